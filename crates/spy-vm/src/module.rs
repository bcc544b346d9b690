//! Runtime modules and the registries used to assemble the builtin ones.

use std::sync::Mutex;

use indexmap::IndexMap;

use spy_core::fqn::Fqn;

use crate::value::Value;

/// A module at run time: a named, insertion-ordered namespace. Module
/// attributes are also reachable as VM globals through their FQNs; the dict
/// here is the module-local view used by attribute access.
#[derive(Debug)]
pub struct WModule {
    pub name: String,
    pub filename: Option<String>,
    dict: Mutex<IndexMap<String, Value>>,
}

impl WModule {
    pub fn new(name: impl Into<String>, filename: Option<String>) -> WModule {
        WModule {
            name: name.into(),
            filename,
            dict: Mutex::new(IndexMap::new()),
        }
    }

    pub fn fqn(&self) -> Fqn {
        Fqn::module(self.name.clone())
    }

    pub fn getattr_maybe(&self, name: &str) -> Option<Value> {
        self.dict.lock().unwrap().get(name).cloned()
    }

    pub fn setattr(&self, name: impl Into<String>, value: Value) {
        self.dict.lock().unwrap().insert(name.into(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.dict.lock().unwrap().keys().cloned().collect()
    }
}

/// A builder collecting the content of one builtin module before the VM
/// installs it: `(fqn, value)` pairs in registration order. Hidden entries
/// become globals without appearing in the module dict (synthesized helpers
/// like per-type constructors).
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    pub modname: String,
    pub content: Vec<(Fqn, Value)>,
    pub hidden: Vec<(Fqn, Value)>,
    /// Names visible in this module's dict that are globals of *another*
    /// module (e.g. `gc_alloc` surfaced in `builtins`).
    pub aliases: Vec<(String, Value)>,
}

impl ModuleRegistry {
    pub fn new(modname: impl Into<String>) -> ModuleRegistry {
        ModuleRegistry {
            modname: modname.into(),
            content: Vec::new(),
            hidden: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn add_alias(&mut self, attr: impl Into<String>, value: Value) {
        self.aliases.push((attr.into(), value));
    }

    pub fn add(&mut self, attr: &str, value: Value) -> Fqn {
        let fqn = Fqn::new(self.modname.clone(), attr);
        self.content.push((fqn.clone(), value));
        fqn
    }

    pub fn add_hidden(&mut self, fqn: Fqn, value: Value) {
        self.hidden.push((fqn, value));
    }
}
