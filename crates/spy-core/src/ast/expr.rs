use serde::{Deserialize, Serialize};

use crate::fqn::Fqn;
use crate::span::Span;

pub type BExpr = Box<Expr>;

/// A literal constant. Unsupported literal kinds are rejected by the parser,
/// so this is a closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Bool(bool),
    I8(i8),
    I32(i32),
    F64(f64),
    None,
}

impl std::fmt::Display for Lit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lit::Bool(true) => write!(f, "True"),
            Lit::Bool(false) => write!(f, "False"),
            Lit::I8(x) => write!(f, "{}", x),
            Lit::I32(x) => write!(f, "{}", x),
            Lit::F64(x) => write!(f, "{}", x),
            Lit::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinOpKind {
    pub fn token(self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::FloorDiv => "//",
            BinOpKind::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOpKind {
    pub fn token(self) -> &'static str {
        match self {
            CmpOpKind::Eq => "==",
            CmpOpKind::Ne => "!=",
            CmpOpKind::Lt => "<",
            CmpOpKind::Le => "<=",
            CmpOpKind::Gt => ">",
            CmpOpKind::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Neg,
    Not,
}

impl UnaryOpKind {
    pub fn token(self) -> &'static str {
        match self {
            UnaryOpKind::Neg => "-",
            UnaryOpKind::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}

/// One piece of an f-string: either literal text or an interpolated
/// expression converted through the `STR` operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStrPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Const),
    StrConst(StrConst),
    /// Reference to a global value by FQN. The parser never produces this:
    /// redshift synthesizes it for prebuilt constants and resolved call
    /// targets.
    FqnConst(FqnConst),
    Name(Name),
    BinOp(BinOp),
    UnaryOp(UnaryOp),
    Compare(Compare),
    BoolOp(BoolOp),
    Call(Call),
    CallMethod(CallMethod),
    GetAttr(GetAttr),
    GetItem(GetItem),
    List(ListExpr),
    Tuple(TupleExpr),
    FStr(FStr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Const {
    pub span: Span,
    pub value: Lit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrConst {
    pub span: Span,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FqnConst {
    pub span: Span,
    pub fqn: Fqn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Name {
    pub span: Span,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinOp {
    pub span: Span,
    pub op: BinOpKind,
    pub left: BExpr,
    pub right: BExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryOp {
    pub span: Span,
    pub op: UnaryOpKind,
    pub value: BExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compare {
    pub span: Span,
    pub op: CmpOpKind,
    pub left: BExpr,
    pub right: BExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolOp {
    pub span: Span,
    pub op: BoolOpKind,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub span: Span,
    pub func: BExpr,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethod {
    pub span: Span,
    pub target: BExpr,
    pub method: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetAttr {
    pub span: Span,
    pub value: BExpr,
    pub attr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetItem {
    pub span: Span,
    pub value: BExpr,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListExpr {
    pub span: Span,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleExpr {
    pub span: Span,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FStr {
    pub span: Span,
    pub parts: Vec<FStrPart>,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Const(x) => x.span,
            Expr::StrConst(x) => x.span,
            Expr::FqnConst(x) => x.span,
            Expr::Name(x) => x.span,
            Expr::BinOp(x) => x.span,
            Expr::UnaryOp(x) => x.span,
            Expr::Compare(x) => x.span,
            Expr::BoolOp(x) => x.span,
            Expr::Call(x) => x.span,
            Expr::CallMethod(x) => x.span,
            Expr::GetAttr(x) => x.span,
            Expr::GetItem(x) => x.span,
            Expr::List(x) => x.span,
            Expr::Tuple(x) => x.span,
            Expr::FStr(x) => x.span,
        }
    }

    // Shorthand constructors, mostly for tests and for nodes synthesized by
    // desugaring.

    pub fn const_(span: Span, value: Lit) -> Expr {
        Expr::Const(Const { span, value })
    }

    pub fn i32(span: Span, value: i32) -> Expr {
        Expr::const_(span, Lit::I32(value))
    }

    pub fn f64(span: Span, value: f64) -> Expr {
        Expr::const_(span, Lit::F64(value))
    }

    pub fn bool(span: Span, value: bool) -> Expr {
        Expr::const_(span, Lit::Bool(value))
    }

    pub fn none(span: Span) -> Expr {
        Expr::const_(span, Lit::None)
    }

    pub fn str(span: Span, value: impl Into<String>) -> Expr {
        Expr::StrConst(StrConst {
            span,
            value: value.into(),
        })
    }

    pub fn fqn_const(span: Span, fqn: Fqn) -> Expr {
        Expr::FqnConst(FqnConst { span, fqn })
    }

    pub fn name(span: Span, id: impl Into<String>) -> Expr {
        Expr::Name(Name {
            span,
            id: id.into(),
        })
    }

    pub fn binop(span: Span, op: BinOpKind, left: Expr, right: Expr) -> Expr {
        Expr::BinOp(BinOp {
            span,
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn compare(span: Span, op: CmpOpKind, left: Expr, right: Expr) -> Expr {
        Expr::Compare(Compare {
            span,
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(span: Span, op: UnaryOpKind, value: Expr) -> Expr {
        Expr::UnaryOp(UnaryOp {
            span,
            op,
            value: Box::new(value),
        })
    }

    pub fn call(span: Span, func: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            span,
            func: Box::new(func),
            args,
        })
    }

    pub fn call_method(span: Span, target: Expr, method: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::CallMethod(CallMethod {
            span,
            target: Box::new(target),
            method: method.into(),
            args,
        })
    }

    pub fn getattr(span: Span, value: Expr, attr: impl Into<String>) -> Expr {
        Expr::GetAttr(GetAttr {
            span,
            value: Box::new(value),
            attr: attr.into(),
        })
    }

    pub fn getitem(span: Span, value: Expr, args: Vec<Expr>) -> Expr {
        Expr::GetItem(GetItem {
            span,
            value: Box::new(value),
            args,
        })
    }
}
