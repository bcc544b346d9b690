//! Fully Qualified Names.
//!
//! An FQN identifies a *unique* named object inside a VM: every function,
//! type and constant that is globally visible has exactly one. The canonical
//! string form is `modname::attr[qual, ...]#suffix`, where `modname` can be
//! dotted (`a.b.c`), the qualifiers record generic instantiations
//! (`builtins::list[i32]`) and the numeric suffix disambiguates otherwise
//! identical synthesized names:
//!
//! ```text
//! @blue
//! def make_fn(T):
//!     def fn(x: T) -> T: ...
//!     return fn
//!
//! make_fn(i32)   # fn gets FQN 'test::make_fn[i32].fn'
//! make_fn(f64)   # fn gets FQN 'test::make_fn[f64].fn'
//! ```
//!
//! Uniqueness is enforced by the VM (`Vm::get_unique_fqn`), not here.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// One `[...]` qualifier. The key is optional: generic instantiations use
/// bare values (`list[i32]`), keyed qualifiers render as `k=v`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualifier {
    pub key: Option<String>,
    pub value: String,
}

impl Qualifier {
    pub fn value(value: impl Into<String>) -> Qualifier {
        Qualifier {
            key: None,
            value: value.into(),
        }
    }

    pub fn keyed(key: impl Into<String>, value: impl Into<String>) -> Qualifier {
        Qualifier {
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}={}", key, self.value),
            None => write!(f, "{}", self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fqn {
    pub modname: String,
    pub attr: String,
    pub qualifiers: Vec<Qualifier>,
    pub suffix: Option<u32>,
}

impl Fqn {
    pub fn new(modname: impl Into<String>, attr: impl Into<String>) -> Fqn {
        Fqn {
            modname: modname.into(),
            attr: attr.into(),
            qualifiers: Vec::new(),
            suffix: None,
        }
    }

    /// The FQN of a whole module (`attr` is empty).
    pub fn module(modname: impl Into<String>) -> Fqn {
        Fqn::new(modname, "")
    }

    /// Parse the `modname::attr` form. Qualified/suffixed forms are only ever
    /// built programmatically, so this accepts just the two-part shape used
    /// when naming builtins.
    pub fn parse(fullname: &str) -> Fqn {
        match fullname.split_once("::") {
            Some((modname, attr)) => Fqn::new(modname, attr),
            None => Fqn::module(fullname),
        }
    }

    pub fn is_module(&self) -> bool {
        self.attr.is_empty()
    }

    pub fn is_object(&self) -> bool {
        !self.attr.is_empty()
    }

    /// Derive the FQN for a name nested inside this one: the attr becomes a
    /// dotted segment of the namespace.
    pub fn join(&self, name: &str) -> Fqn {
        let modname = if self.attr.is_empty() {
            self.modname.clone()
        } else {
            format!("{}.{}", self.modname, self.human_attr())
        };
        Fqn::new(modname, name)
    }

    pub fn with_suffix(&self, suffix: u32) -> Fqn {
        let mut fqn = self.clone();
        fqn.suffix = Some(suffix);
        fqn
    }

    pub fn with_qualifiers(&self, qualifiers: Vec<Qualifier>) -> Fqn {
        let mut fqn = self.clone();
        fqn.qualifiers = qualifiers;
        fqn
    }

    /// `attr` plus qualifiers, without modname or suffix.
    fn human_attr(&self) -> String {
        if self.qualifiers.is_empty() {
            self.attr.clone()
        } else {
            format!("{}[{}]", self.attr, self.qualifiers.iter().join(", "))
        }
    }

    /// Human-oriented rendering used in error messages: `modname.attr`,
    /// except that builtins are so pervasive that they are shown bare
    /// (`i32`, not `builtins.i32`).
    pub fn human_name(&self) -> String {
        if self.modname == "builtins" {
            self.human_attr()
        } else {
            format!("{}.{}", self.modname, self.human_attr())
        }
    }

    /// The name this object gets in emitted C sources.
    pub fn c_name(&self) -> String {
        let mut s = format!("spy_{}__{}", self.modname.replace('.', "_"), self.attr);
        for q in &self.qualifiers {
            s.push_str("__");
            s.push_str(&q.value.replace(['.', ':'], "_"));
        }
        if let Some(n) = self.suffix {
            s.push_str(&format!("__{}", n));
        }
        s
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.modname, self.human_attr())?;
        if let Some(n) = self.suffix {
            write!(f, "#{}", n)?;
        }
        Ok(())
    }
}

impl From<&str> for Fqn {
    fn from(fullname: &str) -> Fqn {
        Fqn::parse(fullname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_form() {
        let fqn = Fqn::new("a.b", "foo");
        assert_eq!(fqn.to_string(), "a.b::foo");
        assert_eq!(fqn.with_suffix(2).to_string(), "a.b::foo#2");
    }

    #[test]
    fn qualifiers() {
        let fqn = Fqn::new("builtins", "list").with_qualifiers(vec![Qualifier::value("i32")]);
        assert_eq!(fqn.to_string(), "builtins::list[i32]");
        assert_eq!(fqn.human_name(), "list[i32]");
        let keyed = Fqn::new("test", "m").with_qualifiers(vec![Qualifier::keyed("R", "2")]);
        assert_eq!(keyed.to_string(), "test::m[R=2]");
    }

    #[test]
    fn join_nests_the_attr() {
        let make_fn = Fqn::new("test", "make_fn").with_qualifiers(vec![Qualifier::value("f64")]);
        let inner = make_fn.join("fn");
        assert_eq!(inner.to_string(), "test.make_fn[f64]::fn");
    }

    #[test]
    fn parse_roundtrip() {
        let fqn = Fqn::parse("operator::i32_add");
        assert_eq!(fqn.modname, "operator");
        assert_eq!(fqn.attr, "i32_add");
        assert!(Fqn::parse("builtins").is_module());
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Fqn::parse("m::x"), Fqn::new("m", "x"));
        assert_ne!(Fqn::new("m", "x"), Fqn::new("m", "x").with_suffix(0));
    }

    #[test]
    fn c_name_mangling() {
        let fqn = Fqn::new("a.b", "foo").with_suffix(1);
        assert_eq!(fqn.c_name(), "spy_a_b__foo__1");
    }
}
