//! Redshift: partial evaluation of a red function into its residual form.
//!
//! The residual function is monomorphic and all-red: every blue subtree has
//! been folded into a constant, every call target resolved to an FQN, every
//! operator pinned to a concrete `operator::*` function. Per function the
//! states are `Unresolved -> Resolving -> Redshifted`; re-entering
//! `Resolving` means blue evaluation depends on its own output and is
//! reported as a static error with the blue call stack.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use spy_core::ast::Color;
use spy_core::error::{Error, ErrorKind, Result};

use crate::frame::Frame;
use crate::value::{AstFunc, Ty, Value, WFunc};
use crate::vm::Vm;

/// What to do with a static error met while shifting a statement: abort
/// compilation (`Eager`) or turn the statement into a residual `raise` of
/// the prebuilt exception and keep going (`Lazy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    Eager,
    Lazy,
}

pub fn redshift(vm: &mut Vm, func: &Arc<WFunc>, error_mode: ErrorMode) -> Result<Arc<WFunc>> {
    let astfunc = func.as_astfunc().ok_or_else(|| {
        Error::spy(ErrorKind::Value, "only AST functions can be redshifted")
    })?;
    debug_assert_eq!(func.color(), Color::Red);
    if astfunc.redshifted {
        // redshift is idempotent
        return Ok(func.clone());
    }

    if !vm.enter_redshift(&func.fqn) {
        return Err(Error::spy(
            ErrorKind::Static,
            format!("cycle while redshifting `{}`", func.fqn),
        ));
    }
    debug!(fqn = %func.fqn, "redshifting");
    let result = redshift_inner(vm, func, astfunc, error_mode);
    vm.leave_redshift(&func.fqn);
    result
}

fn redshift_inner(
    vm: &mut Vm,
    func: &Arc<WFunc>,
    astfunc: &AstFunc,
    error_mode: ErrorMode,
) -> Result<Arc<WFunc>> {
    let (body, locals_types): (Vec<_>, HashMap<String, Ty>) = {
        let mut frame = Frame::redshift(vm, func, error_mode)?;
        frame.redshift_body()?
    };

    let mut funcdef = (*astfunc.funcdef).clone();
    funcdef.body = body;

    // direct outer references have all been folded into constants; the
    // closure is kept only for module-level cells, which stay by-name
    Ok(WFunc::ast(
        func.fqn.clone(),
        func.functype.clone(),
        AstFunc {
            funcdef: Arc::new(funcdef),
            closure: astfunc.closure.clone(),
            scopes: astfunc.scopes.clone(),
            redshifted: true,
            locals_types,
        },
    ))
}

/// Redshift one function and return the residual body, for tests and tools
/// that want to inspect the output without touching the VM's globals.
pub fn redshift_value(vm: &mut Vm, value: &Value, error_mode: ErrorMode) -> Result<Arc<WFunc>> {
    match value {
        Value::Func(func) => redshift(vm, func, error_mode),
        other => Err(Error::spy(
            ErrorKind::Type,
            format!("cannot redshift {}", other),
        )),
    }
}
