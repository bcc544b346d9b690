//! Static analysis that runs between parsing and evaluation: the scope
//! analyzer classifies every name into local/outer/module storage and builds
//! one symbol table per scope.

mod scope;
mod symtable;

pub use scope::{ScopeAnalyzer, ScopeMap};
pub use symtable::{Storage, SymTable, Symbol, VarKindOrigin};
