//! The AST node set, as received from the external indentation-aware parser.
//!
//! Nodes carry source spans only: static types and colors are attached by
//! evaluation (every expression is described by an `OpArg` while a frame
//! walks it), and the redshift pass produces a new tree of the same shape
//! whose calls reference resolved FQNs. The whole tree is serde-serializable;
//! that serialized form is what the external C emitter consumes.

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;

use serde::{Deserialize, Serialize};

use crate::span::Span;

/// Compile-time knowledge about an expression or a binding: `Blue` values are
/// known during redshift and fold into the residual program, `Red` ones only
/// exist at run time. Any red dependency makes the whole expression red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Blue,
    Red,
}

impl Color {
    /// Blue only if every given color is blue.
    pub fn meet(colors: impl IntoIterator<Item = Color>) -> Color {
        for color in colors {
            if color == Color::Red {
                return Color::Red;
            }
        }
        Color::Blue
    }

    pub fn is_blue(self) -> bool {
        self == Color::Blue
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Blue => write!(f, "blue"),
            Color::Red => write!(f, "red"),
        }
    }
}

/// Identifier of a scope inside one module: assigned by the scope analyzer to
/// the module itself and to every `FuncDef`/`ClassDef`, and used to look up
/// the matching symbol table.
pub type ScopeId = u32;

/// A whole source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub filename: String,
    pub span: Span,
    pub body: Vec<Stmt>,
    /// Filled in by the scope analyzer.
    pub scope: ScopeId,
}

impl Module {
    pub fn new(filename: impl Into<String>, span: Span, body: Vec<Stmt>) -> Module {
        Module {
            filename: filename.into(),
            span,
            body,
            scope: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_meet() {
        assert_eq!(Color::meet([]), Color::Blue);
        assert_eq!(Color::meet([Color::Blue, Color::Blue]), Color::Blue);
        assert_eq!(Color::meet([Color::Blue, Color::Red]), Color::Red);
    }
}
