use serde::{Deserialize, Serialize};

use super::expr::{BExpr, Expr};
use super::{Color, ScopeId};
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarKind {
    Var,
    Const,
}

/// How a function participates in blue evaluation:
/// - `Plain`: an ordinary function (red or blue depending on its color).
/// - `Generic`: a blue function whose leading arguments are types; calls are
///   memoized by argument FQNs and the results are the monomorphic instances.
/// - `Metafunc`: a blue function `(vm, *oparg) -> opspec` that resolves a
///   call site instead of being the call target itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuncKind {
    Plain,
    Generic,
    Metafunc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Struct,
    Typelift,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncArg {
    pub span: Span,
    pub name: String,
    pub ty: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDef {
    pub span: Span,
    /// Span of just the `def name(...)` line, for "defined here" notes.
    pub prototype_span: Span,
    pub name: String,
    pub color: Color,
    pub kind: FuncKind,
    pub args: Vec<FuncArg>,
    pub return_type: BExpr,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    /// Filled in by the scope analyzer.
    pub scope: ScopeId,
}

/// A field declaration inside a `ClassDef` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub span: Span,
    pub name: String,
    pub ty: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub span: Span,
    pub name: String,
    pub kind: ClassKind,
    pub fields: Vec<FieldDef>,
    /// Method definitions; capability names (`__getitem__`, `__EQ__`, ...)
    /// land in the type's capability table.
    pub methods: Vec<FuncDef>,
    /// Filled in by the scope analyzer.
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Pass(Pass),
    Expr(StmtExpr),
    Return(Return),
    VarDef(VarDef),
    Assign(Assign),
    AugAssign(AugAssign),
    SetAttr(SetAttr),
    SetItem(SetItem),
    If(If),
    While(While),
    For(For),
    Break(Break),
    Continue(Continue),
    Raise(Raise),
    Assert(Assert),
    FuncDef(FuncDef),
    ClassDef(ClassDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtExpr {
    pub span: Span,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Return {
    pub span: Span,
    pub value: Expr,
}

/// A declaration `x: T` or `var x: T`. The parser splits `x: T = e` into a
/// `VarDef` followed by an `Assign`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDef {
    pub span: Span,
    pub kind: Option<VarKind>,
    pub name: String,
    pub ty: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    pub span: Span,
    pub target_span: Span,
    pub target: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugAssign {
    pub span: Span,
    pub target_span: Span,
    pub target: String,
    pub op: super::BinOpKind,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttr {
    pub span: Span,
    pub target: Expr,
    pub attr: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetItem {
    pub span: Span,
    pub target: Expr,
    pub args: Vec<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct If {
    pub span: Span,
    pub test: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct While {
    pub span: Span,
    pub test: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct For {
    pub span: Span,
    pub target_span: Span,
    pub target: String,
    pub iter: Expr,
    pub body: Vec<Stmt>,
    /// Per-function ordinal of this loop, used to name the hidden iterator
    /// variable `_$iterN`.
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Break {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continue {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raise {
    pub span: Span,
    pub exc: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assert {
    pub span: Span,
    pub test: Expr,
    pub msg: Option<Expr>,
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Pass(x) => x.span,
            Stmt::Expr(x) => x.span,
            Stmt::Return(x) => x.span,
            Stmt::VarDef(x) => x.span,
            Stmt::Assign(x) => x.span,
            Stmt::AugAssign(x) => x.span,
            Stmt::SetAttr(x) => x.span,
            Stmt::SetItem(x) => x.span,
            Stmt::If(x) => x.span,
            Stmt::While(x) => x.span,
            Stmt::For(x) => x.span,
            Stmt::Break(x) => x.span,
            Stmt::Continue(x) => x.span,
            Stmt::Raise(x) => x.span,
            Stmt::Assert(x) => x.span,
            Stmt::FuncDef(x) => x.span,
            Stmt::ClassDef(x) => x.span,
        }
    }

    pub fn expr(span: Span, value: Expr) -> Stmt {
        Stmt::Expr(StmtExpr { span, value })
    }

    pub fn ret(span: Span, value: Expr) -> Stmt {
        Stmt::Return(Return { span, value })
    }

    pub fn assign(span: Span, target: impl Into<String>, value: Expr) -> Stmt {
        Stmt::Assign(Assign {
            span,
            target_span: span,
            target: target.into(),
            value,
        })
    }
}
