//! Function values: AST functions (closures over source code) and builtin
//! functions (Rust closures). Both are immutable once created and addressed
//! by FQN.

use std::collections::HashMap;
use std::sync::Arc;

use spy_core::analyze::ScopeMap;
use spy_core::ast::{self, Color, FuncKind};
use spy_core::error::Result;
use spy_core::fqn::Fqn;

use super::ty::Ty;
use super::{Namespace, Value};
use crate::vm::Vm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncParam {
    pub name: String,
    pub ty: Ty,
    /// A trailing `*args`-style parameter which absorbs any number of
    /// arguments. Only builtin protocol functions use this.
    pub variadic: bool,
}

impl FuncParam {
    pub fn simple(name: impl Into<String>, ty: Ty) -> FuncParam {
        FuncParam {
            name: name.into(),
            ty,
            variadic: false,
        }
    }

    pub fn variadic(name: impl Into<String>, ty: Ty) -> FuncParam {
        FuncParam {
            name: name.into(),
            ty,
            variadic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<FuncParam>,
    pub restype: Ty,
    pub color: Color,
    pub kind: FuncKind,
}

impl FuncType {
    pub fn new(params: Vec<FuncParam>, restype: Ty, color: Color, kind: FuncKind) -> FuncType {
        FuncType {
            params,
            restype,
            color,
            kind,
        }
    }

    pub fn red(params: Vec<FuncParam>, restype: Ty) -> FuncType {
        FuncType::new(params, restype, Color::Red, FuncKind::Plain)
    }

    pub fn blue(params: Vec<FuncParam>, restype: Ty) -> FuncType {
        FuncType::new(params, restype, Color::Blue, FuncKind::Plain)
    }

    pub fn is_argcount_ok(&self, n: usize) -> bool {
        match self.params.last() {
            Some(last) if last.variadic => n >= self.params.len() - 1,
            _ => n == self.params.len(),
        }
    }

    /// The declared type of the i-th argument.
    pub fn param_ty(&self, i: usize) -> &Ty {
        match self.params.last() {
            Some(last) if last.variadic && i >= self.params.len() - 1 => &last.ty,
            _ => &self.params[i].ty,
        }
    }
}

/// The body of an AST function: the funcdef plus the captured environment.
#[derive(Debug)]
pub struct AstFunc {
    pub funcdef: Arc<ast::FuncDef>,
    /// Captured namespaces, outermost first; `closure[len - level]` is the
    /// namespace a level-`level` outer symbol lives in.
    pub closure: Vec<Namespace>,
    /// Symbol tables of the module this function was defined in.
    pub scopes: Arc<ScopeMap>,
    /// True for the output of redshift: every node is red and every call
    /// target resolved.
    pub redshifted: bool,
    /// Final static types of the locals, recorded by redshift for the
    /// emitter.
    pub locals_types: HashMap<String, Ty>,
}

pub type BuiltinImpl = Arc<dyn Fn(&mut Vm, &[Value]) -> Result<Value> + Send + Sync>;

pub enum FuncBody {
    Ast(AstFunc),
    Builtin(BuiltinImpl),
}

impl std::fmt::Debug for FuncBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FuncBody::Ast(ast) => f.debug_tuple("Ast").field(&ast.funcdef.name).finish(),
            FuncBody::Builtin(_) => f.write_str("Builtin(..)"),
        }
    }
}

#[derive(Debug)]
pub struct WFunc {
    pub fqn: Fqn,
    pub functype: FuncType,
    /// Pure functions can be folded during redshift when all their arguments
    /// are blue. All the `operator::*` scalar functions are pure; anything
    /// with side effects (prints, pointer stores) is not.
    pub pure: bool,
    pub body: FuncBody,
}

impl WFunc {
    pub fn ast(fqn: Fqn, functype: FuncType, ast: AstFunc) -> Arc<WFunc> {
        Arc::new(WFunc {
            fqn,
            functype,
            pure: false,
            body: FuncBody::Ast(ast),
        })
    }

    pub fn builtin(fqn: Fqn, functype: FuncType, pure: bool, imp: BuiltinImpl) -> Arc<WFunc> {
        Arc::new(WFunc {
            fqn,
            functype,
            pure,
            body: FuncBody::Builtin(imp),
        })
    }

    pub fn color(&self) -> Color {
        self.functype.color
    }

    pub fn kind(&self) -> FuncKind {
        self.functype.kind
    }

    pub fn is_blue(&self) -> bool {
        self.color() == Color::Blue
    }

    pub fn as_astfunc(&self) -> Option<&AstFunc> {
        match &self.body {
            FuncBody::Ast(ast) => Some(ast),
            FuncBody::Builtin(_) => None,
        }
    }

    pub fn is_redshifted(&self) -> bool {
        self.as_astfunc().is_some_and(|ast| ast.redshifted)
    }
}

impl std::fmt::Display for WFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<func {}>", self.fqn)
    }
}
