//! Call-site descriptors for operator dispatch.
//!
//! The execution of any operator happens in three steps:
//!
//! 1. the frame builds one [`OpArg`] per operand and calls the OPERATOR (a
//!    blue metafunction) with them;
//! 2. the OPERATOR picks an implementation and returns an [`OpSpec`]; the
//!    typechecker turns it into an executable [`OpImpl`](crate::opimpl::OpImpl),
//!    inserting argument converters — this is where dispatch can fail;
//! 3. the OpImpl runs on the actual values (or, during redshift, becomes a
//!    residual call node).
//!
//! OPERATORs never see operand *values* unless they are blue: an `OpArg` of a
//! red operand carries only the static type. That is what makes the OPERATOR
//! call itself blue, so redshift can fold it away completely.

use std::sync::Arc;

use spy_core::analyze::Symbol;
use spy_core::ast::Color;
use spy_core::error::{Error, ErrorKind, Result};
use spy_core::span::Span;

use crate::value::{Ty, Value, WFunc};

/// One call-site operand: color, static type, the value when it is known,
/// and bookkeeping for error messages.
#[derive(Debug, Clone)]
pub struct OpArg {
    pub color: Color,
    pub static_ty: Ty,
    /// Always present for blue opargs. For red ones, present in interp mode
    /// and absent during redshift (the value only exists at run time).
    pub val: Option<Value>,
    pub span: Span,
    /// The position of this operand at the call site, used to wire residual
    /// arguments. `None` for opargs synthesized inside OPERATORs.
    pub idx: Option<usize>,
    /// The symbol this operand was read from, if any.
    pub sym: Option<Symbol>,
}

impl OpArg {
    pub fn blue(static_ty: Ty, val: Value, span: Span) -> OpArg {
        OpArg {
            color: Color::Blue,
            static_ty,
            val: Some(val),
            span,
            idx: None,
            sym: None,
        }
    }

    pub fn red(static_ty: Ty, val: Option<Value>, span: Span) -> OpArg {
        OpArg {
            color: Color::Red,
            static_ty,
            val,
            span,
            idx: None,
            sym: None,
        }
    }

    pub fn with_idx(mut self, idx: usize) -> OpArg {
        self.idx = Some(idx);
        self
    }

    pub fn with_sym(mut self, sym: Option<Symbol>) -> OpArg {
        self.sym = sym;
        self
    }

    pub fn is_blue(&self) -> bool {
        self.color == Color::Blue
    }

    /// The concrete value. Only redshift-mode red opargs lack one; reading
    /// those is a bug in the caller.
    pub fn value(&self) -> &Value {
        self.val
            .as_ref()
            .expect("cannot read the value of an abstract (red) OpArg")
    }

    /// The value, which must be blue; a red operand here is a static error.
    pub fn blue_value(&self) -> Result<&Value> {
        if self.color != Color::Blue {
            return Err(Error::simple(
                ErrorKind::Type,
                "expected blue argument",
                "this is red",
                self.span,
            ));
        }
        Ok(self.value())
    }

    pub fn blue_str(&self) -> Result<&str> {
        match self.blue_value()? {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(Error::simple(
                ErrorKind::Type,
                format!("expected `str`, got `{}`", other),
                "expected `str`",
                self.span,
            )),
        }
    }

    pub fn blue_type(&self) -> Result<Ty> {
        match self.blue_value()? {
            Value::Type(ty) => Ok(ty.clone()),
            _ => Err(Error::simple(
                ErrorKind::Type,
                format!("expected `type`, got `{}`", self.static_ty.human_name()),
                "expected `type`",
                self.span,
            )),
        }
    }

    /// Forget the blue value, keeping only the static type. Used to avoid
    /// over-specializing OPERATORs on operand values they do not care about.
    pub fn as_red(&self) -> OpArg {
        let mut arg = self.clone();
        arg.color = Color::Red;
        arg
    }
}

impl std::fmt::Display for OpArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<oparg {} {}", self.color, self.static_ty.human_name())?;
        if self.is_blue() {
            write!(f, " = {}", self.value())?;
        }
        write!(f, ">")
    }
}

/// What an OPERATOR answers: "this function implements the operation" (with
/// optionally rearranged arguments), "the result is this constant", or NULL —
/// the sentinel for "I don't handle these operands, try the next candidate".
#[derive(Debug, Clone)]
pub enum OpSpec {
    Null,
    Simple {
        func: Arc<WFunc>,
    },
    /// The OPERATOR chose its own argument list: a mix of call-site operands
    /// (recognizable by their `idx`) and synthesized constants.
    Complex {
        func: Arc<WFunc>,
        args: Vec<OpArg>,
    },
    Const {
        value: Value,
    },
}

impl OpSpec {
    pub fn simple(func: Arc<WFunc>) -> OpSpec {
        OpSpec::Simple { func }
    }

    pub fn complex(func: Arc<WFunc>, args: Vec<OpArg>) -> OpSpec {
        OpSpec::Complex { func, args }
    }

    pub fn const_(value: Value) -> OpSpec {
        OpSpec::Const { value }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OpSpec::Null)
    }

    pub fn into_value(self) -> Value {
        Value::OpSpec(Arc::new(self))
    }
}

impl std::fmt::Display for OpSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpSpec::Null => write!(f, "<opspec NULL>"),
            OpSpec::Simple { func } => write!(f, "<opspec {}>", func.fqn),
            OpSpec::Complex { func, .. } => write!(f, "<opspec {}(...)>", func.fqn),
            OpSpec::Const { value } => write!(f, "<opspec const {}>", value),
        }
    }
}
