//! Implicit conversions.
//!
//! `convert_maybe` answers "which function turns this operand into the
//! expected type?", returning `None` when the types are already compatible.
//! It backs both the per-argument converters inserted by
//! [`typecheck_opspec`](crate::opimpl::typecheck_opspec) and the typecheck
//! a frame performs when a value flows into an annotated slot.

use std::sync::Arc;

use spy_core::error::{Error, ErrorKind, Level, Result, SpyError};

use crate::opspec::OpArg;
use crate::value::{Ty, TyKind, WFunc};
use crate::vm::Vm;

/// The conversion function for `got -> expected`, or `None` if `got` is
/// already acceptable where `expected` is wanted. A type mismatch with no
/// known conversion is a `TypeError` anchored at the operand.
pub fn convert_maybe(vm: &mut Vm, expected: &Ty, arg: &OpArg) -> Result<Option<Arc<WFunc>>> {
    let got = &arg.static_ty;
    if vm.issubclass(got, expected) {
        return Ok(None);
    }

    if let Some(conv) = vm.builtins().mm.lookup_func("convert", got, expected) {
        return Ok(Some(conv));
    }

    // typelift: lifted <-> low-level representation
    if let TyKind::Lifted = expected.kind() {
        if expected.body().ll_ty.as_ref() == Some(got) {
            if let Some(lift) = expected.lookup_func("__lift__") {
                return Ok(Some(lift));
            }
        }
    }
    if let TyKind::Lifted = got.kind() {
        if got.body().ll_ty.as_ref() == Some(expected) {
            if let Some(unlift) = got.lookup_func("__unlift__") {
                return Ok(Some(unlift));
            }
        }
    }

    let mut err = SpyError::new(ErrorKind::Type, "mismatched types");
    err.add(
        Level::Error,
        format!(
            "expected `{}`, got `{}`",
            expected.human_name(),
            got.human_name()
        ),
        arg.span,
    );
    Err(Error::Spy(err))
}
