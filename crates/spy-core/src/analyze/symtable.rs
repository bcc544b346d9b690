//! Symbol tables.
//!
//! A [`SymTable`] collects all the names visible in one scope. Names are of
//! two kinds:
//!
//! - definitions: introduced by this scope, `sym.level == 0`;
//! - references: defined by an outer scope and captured here, `sym.level > 0`.
//!
//! Var-kind rules: function and class definitions are always `const`;
//! function parameters are `var` in red functions and `const` in blue ones;
//! module-level bindings are `const` unless explicitly marked `var`; a local
//! is `const` if it is assigned exactly once outside any loop, `var`
//! otherwise.

use std::collections::HashMap;

use crate::ast::{Color, VarKind};
use crate::span::Span;

/// Where a variable's storage lives.
///
/// - `Direct`: a slot in the frame's locals (or, for outer references, in a
///   captured namespace).
/// - `Cell`: a mutable module-level variable, promoted to a VM-global cell so
///   that writes are visible everywhere.
/// - `Missing`: referenced but defined nowhere; reading it is a `NameError`,
///   reported lazily with the use-site span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    Direct,
    Cell,
    Missing,
}

/// How a symbol's var-kind was determined. `Auto` marks single-assignment
/// locals: assigning to those once is fine, while assigning to any other
/// const is a static error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKindOrigin {
    Auto,
    GlobalConst,
    Explicit,
    FuncDef,
    ClassDef,
    ClassField,
    RedParam,
    BlueParam,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub varkind: VarKind,
    pub origin: VarKindOrigin,
    pub storage: Storage,
    /// 0 for definitions; the number of scopes to walk outwards for
    /// references.
    pub level: u32,
    /// Where the symbol is defined.
    pub span: Span,
    /// Where its type annotation is (or, for implicit declarations, the
    /// expression the type was inferred from).
    pub type_span: Span,
}

impl Symbol {
    pub fn is_local(&self) -> bool {
        self.level == 0
    }

    /// Const bindings are compile-time known, var bindings are not. The
    /// actual color of an `Auto` const still depends on the color of the
    /// value bound to it; the frame refines this at the first assignment.
    pub fn color(&self) -> Color {
        match self.varkind {
            VarKind::Const => Color::Blue,
            VarKind::Var => Color::Red,
        }
    }

    pub fn with_level(&self, level: u32) -> Symbol {
        let mut sym = self.clone();
        sym.level = level;
        sym
    }
}

#[derive(Debug, Clone)]
pub struct SymTable {
    /// Dotted scope name, for debugging and error messages.
    pub name: String,
    /// The color of the frame this scope corresponds to: red for red
    /// functions, blue for blue functions, modules and class bodies.
    pub color: Color,
    symbols: HashMap<String, Symbol>,
}

impl SymTable {
    pub fn new(name: impl Into<String>, color: Color) -> SymTable {
        SymTable {
            name: name.into(),
            color,
            symbols: HashMap::new(),
        }
    }

    pub fn add(&mut self, sym: Symbol) {
        debug_assert!(!self.symbols.contains_key(&sym.name));
        self.symbols.insert(sym.name.clone(), sym);
    }

    pub fn replace(&mut self, sym: Symbol) {
        self.symbols.insert(sym.name.clone(), sym);
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Like [`lookup`](Self::lookup), but only if the symbol is a definition
    /// of this scope.
    pub fn lookup_definition(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name).filter(|sym| sym.is_local())
    }

    pub fn has_definition(&self, name: &str) -> bool {
        self.lookup_definition(name).is_some()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
}
