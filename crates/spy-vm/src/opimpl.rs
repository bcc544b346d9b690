//! Resolved operator implementations.
//!
//! [`typecheck_opspec`] is the single funnel between "an OPERATOR picked an
//! implementation" and "we have something executable": it rejects NULL specs
//! with a type error naming the operand types, checks arity, and inserts one
//! converter per argument where the declared parameter type requires it. The
//! result, an [`OpImpl`], can either be executed right away (interp mode) or
//! frozen into residual call nodes (redshift).

use std::sync::Arc;

use spy_core::error::{Error, ErrorKind, Level, Result, SpyError};
use spy_core::span::Span;

use crate::opspec::{OpArg, OpSpec};
use crate::value::{Value, WFunc};
use crate::vm::Vm;

/// How one argument of the resolved call is obtained.
#[derive(Debug, Clone)]
pub enum ArgSpec {
    /// The i-th operand of the call site.
    Arg(usize),
    /// A constant synthesized during dispatch.
    Const { value: Value, span: Span },
    /// Another argspec passed through a converter function.
    Convert {
        conv: Arc<WFunc>,
        inner: Box<ArgSpec>,
    },
}

#[derive(Debug, Clone)]
pub enum OpImplTarget {
    /// A resolved function: the normal case, frozen by FQN at redshift.
    Func(Arc<WFunc>),
    /// The callee is the first argspec itself (calling a red function
    /// value); the remaining argspecs are the call arguments.
    Direct,
    /// No call at all: the operation folds to a constant.
    Const(Value),
}

#[derive(Debug, Clone)]
pub struct OpImpl {
    pub target: OpImplTarget,
    pub args: Vec<ArgSpec>,
    /// The static type of the result.
    pub restype: crate::value::Ty,
    /// The color of invoking the target when purity does not apply: the
    /// function's declared color, red for direct calls, blue for constants.
    pub color: spy_core::ast::Color,
}

impl OpImpl {
    pub fn is_const(&self) -> bool {
        matches!(self.target, OpImplTarget::Const(_))
    }

    /// Whether blue operands make the result blue. Resolved pure functions
    /// fold; direct calls never do (the callee is red by construction).
    pub fn is_pure(&self) -> bool {
        match &self.target {
            OpImplTarget::Func(func) => func.pure,
            OpImplTarget::Direct => false,
            OpImplTarget::Const(_) => true,
        }
    }

    fn resolve_arg(vm: &mut Vm, spec: &ArgSpec, args: &[Value]) -> Result<Value> {
        match spec {
            ArgSpec::Arg(i) => Ok(args[*i].clone()),
            ArgSpec::Const { value, .. } => Ok(value.clone()),
            ArgSpec::Convert { conv, inner } => {
                let value = OpImpl::resolve_arg(vm, inner, args)?;
                vm.fast_call(conv, &[value])
            }
        }
    }

    /// Run the resolved operation on concrete values. `args` are the
    /// call-site operands, in source order.
    pub fn execute(&self, vm: &mut Vm, args: &[Value]) -> Result<Value> {
        match &self.target {
            OpImplTarget::Const(value) => Ok(value.clone()),
            OpImplTarget::Func(func) => {
                let mut real_args = Vec::with_capacity(self.args.len());
                for spec in &self.args {
                    real_args.push(OpImpl::resolve_arg(vm, spec, args)?);
                }
                let func = func.clone();
                vm.fast_call(&func, &real_args)
            }
            OpImplTarget::Direct => {
                let callee = OpImpl::resolve_arg(vm, &self.args[0], args)?;
                let mut real_args = Vec::with_capacity(self.args.len() - 1);
                for spec in &self.args[1..] {
                    real_args.push(OpImpl::resolve_arg(vm, spec, args)?);
                }
                match callee {
                    Value::Func(func) => vm.fast_call(&func, &real_args),
                    other => Err(Error::spy(
                        ErrorKind::Type,
                        format!("cannot call objects of type `{}`", vm.dynamic_type(&other)),
                    )),
                }
            }
        }
    }

    pub fn into_value(self) -> Value {
        Value::OpImpl(Arc::new(self))
    }
}

impl std::fmt::Display for OpImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            OpImplTarget::Func(func) => write!(f, "<opimpl {}>", func.fqn),
            OpImplTarget::Direct => write!(f, "<opimpl direct>"),
            OpImplTarget::Const(value) => write!(f, "<opimpl const {}>", value),
        }
    }
}

/// How the "no implementation" error names the offending operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Only the receiver's type appears in the message.
    Single,
    /// Both operand types appear (binary operators).
    Multi,
}

/// Convert an [`OpSpec`] into an executable [`OpImpl`].
///
/// `args` are the call-site operands in source order; `errmsg` is the
/// message template for NULL specs, with `{0}`/`{1}` replaced by operand
/// type names.
pub fn typecheck_opspec(
    vm: &mut Vm,
    opspec: OpSpec,
    args: &[OpArg],
    span: Span,
    dispatch: Dispatch,
    errmsg: &str,
) -> Result<Arc<OpImpl>> {
    let (func, in_args) = match opspec {
        OpSpec::Null => return Err(null_spec_error(args, span, dispatch, errmsg)),
        OpSpec::Const { value } => {
            let restype = vm.dynamic_type(&value);
            return Ok(Arc::new(OpImpl {
                target: OpImplTarget::Const(value),
                args: Vec::new(),
                restype,
                color: spy_core::ast::Color::Blue,
            }));
        }
        OpSpec::Simple { func } => (func, args.to_vec()),
        OpSpec::Complex { func, args } => (func, args),
    };

    let functype = &func.functype;
    if !functype.is_argcount_ok(in_args.len()) {
        let exp = functype.params.len();
        let got = in_args.len();
        let mut err = SpyError::new(
            ErrorKind::Type,
            format!(
                "this function takes {} {} but {} {} supplied",
                exp,
                spy_core::error::maybe_plural(exp, "argument"),
                got,
                if got == 1 { "argument was" } else { "arguments were" },
            ),
        );
        err.add(Level::Error, "called here", span);
        return Err(err.into());
    }

    let mut specs = Vec::with_capacity(in_args.len());
    for (i, arg) in in_args.iter().enumerate() {
        let base = base_argspec(arg)?;
        let spec = match crate::builtins::convop::convert_maybe(vm, functype.param_ty(i), arg)? {
            // converting a blue operand through a pure converter folds right
            // away, so the residual call takes the converted constant
            Some(conv) if arg.is_blue() && conv.pure => {
                let value = vm.fast_call(&conv, &[arg.value().clone()])?;
                ArgSpec::Const {
                    value,
                    span: arg.span,
                }
            }
            Some(conv) => ArgSpec::Convert {
                conv,
                inner: Box::new(base),
            },
            None => base,
        };
        specs.push(spec);
    }

    let restype = functype.restype.clone();
    let color = functype.color;
    Ok(Arc::new(OpImpl {
        target: OpImplTarget::Func(func),
        args: specs,
        restype,
        color,
    }))
}

/// The opimpl for calling a function value that is only known at run time:
/// the callee is operand 0 and cannot be frozen to an FQN.
pub fn direct_call_opimpl(
    vm: &mut Vm,
    functype: &crate::value::FuncType,
    args: &[OpArg],
) -> Result<Arc<OpImpl>> {
    let mut specs = vec![base_argspec(&args[0])?];
    for (i, arg) in args.iter().enumerate().skip(1) {
        let base = base_argspec(arg)?;
        let spec = match crate::builtins::convop::convert_maybe(vm, functype.param_ty(i - 1), arg)? {
            Some(conv) => ArgSpec::Convert {
                conv,
                inner: Box::new(base),
            },
            None => base,
        };
        specs.push(spec);
    }
    Ok(Arc::new(OpImpl {
        target: OpImplTarget::Direct,
        args: specs,
        restype: functype.restype.clone(),
        color: spy_core::ast::Color::Red,
    }))
}

fn base_argspec(arg: &OpArg) -> Result<ArgSpec> {
    match arg.idx {
        Some(i) => Ok(ArgSpec::Arg(i)),
        None => {
            // synthesized operands must be blue: a red operand with no
            // call-site position cannot exist at run time
            let value = arg.blue_value()?.clone();
            Ok(ArgSpec::Const {
                value,
                span: arg.span,
            })
        }
    }
}

fn null_spec_error(args: &[OpArg], span: Span, dispatch: Dispatch, errmsg: &str) -> Error {
    let t0 = args
        .first()
        .map(|a| a.static_ty.human_name())
        .unwrap_or_default();
    let t1 = args
        .get(1)
        .map(|a| a.static_ty.human_name())
        .unwrap_or_default();
    let message = errmsg.replace("{0}", &t0).replace("{1}", &t1);
    let mut err = SpyError::new(ErrorKind::Type, message);
    match dispatch {
        Dispatch::Single => {
            if let Some(arg) = args.first() {
                err.add(Level::Error, format!("this is `{}`", t0), arg.span);
            }
        }
        Dispatch::Multi => {
            for arg in args.iter().take(2) {
                err.add(
                    Level::Error,
                    format!("this is `{}`", arg.static_ty.human_name()),
                    arg.span,
                );
            }
        }
    }
    if err.annotations.is_empty() {
        err.add(Level::Error, "no implementation", span);
    }
    Error::Spy(err)
}
