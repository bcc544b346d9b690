//! The concrete operator functions: `operator::i32_add`, `operator::f64_div`
//! and friends. These are the FQNs that survive into the residual AST, so
//! their semantics must match the runtime library bit for bit:
//!
//! - `/` on integers is true division with an f64 result; `//` floors toward
//!   negative infinity; `%` takes the sign of the divisor; all three panic on
//!   a zero divisor;
//! - f64→i32 conversion saturates (NaN → 0);
//! - string repetition clamps non-positive counts to the empty string.

use std::sync::Arc;

use spy_core::ast::{Color, FuncKind};
use spy_core::error::{Error, ErrorKind, Result};

use crate::module::ModuleRegistry;
use crate::value::{FuncParam, FuncType, Ty, Value, WFunc, WStr};
use crate::vm::Vm;

fn zero_division() -> Error {
    Error::spy(ErrorKind::Panic, "ZeroDivisionError: division by zero")
}

fn bad_operand(func: &str, value: &Value) -> Error {
    Error::spy(
        ErrorKind::Type,
        format!("`{}` applied to unexpected operand: {}", func, value),
    )
}

pub fn i32_floordiv(a: i32, b: i32) -> Result<i32> {
    if b == 0 {
        return Err(zero_division());
    }
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(q.wrapping_sub(1))
    } else {
        Ok(q)
    }
}

pub fn i32_mod(a: i32, b: i32) -> Result<i32> {
    if b == 0 {
        return Err(zero_division());
    }
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r.wrapping_add(b))
    } else {
        Ok(r)
    }
}

pub fn f64_floordiv(a: f64, b: f64) -> Result<f64> {
    if b == 0.0 {
        return Err(zero_division());
    }
    Ok((a / b).floor())
}

pub fn f64_mod(a: f64, b: f64) -> Result<f64> {
    if b == 0.0 {
        return Err(zero_division());
    }
    Ok(a - b * (a / b).floor())
}

/// Saturating conversion: NaN → 0, above `i32::MAX` → `i32::MAX`, below
/// `i32::MIN` → `i32::MIN`, everything else truncates toward zero.
pub fn f64_to_i32(x: f64) -> i32 {
    if x.is_nan() {
        0
    } else if x > i32::MAX as f64 {
        i32::MAX
    } else if x < i32::MIN as f64 {
        i32::MIN
    } else {
        x as i32
    }
}

/// Handles on the operator functions the dispatch tables reference.
#[derive(Debug, Clone)]
pub struct OperatorFuncs {
    pub i32_add: Arc<WFunc>,
    pub i32_sub: Arc<WFunc>,
    pub i32_mul: Arc<WFunc>,
    pub i32_div: Arc<WFunc>,
    pub i32_floordiv: Arc<WFunc>,
    pub i32_mod: Arc<WFunc>,
    pub i32_neg: Arc<WFunc>,
    pub i32_eq: Arc<WFunc>,
    pub i32_ne: Arc<WFunc>,
    pub i32_lt: Arc<WFunc>,
    pub i32_le: Arc<WFunc>,
    pub i32_gt: Arc<WFunc>,
    pub i32_ge: Arc<WFunc>,
    pub f64_add: Arc<WFunc>,
    pub f64_sub: Arc<WFunc>,
    pub f64_mul: Arc<WFunc>,
    pub f64_div: Arc<WFunc>,
    pub f64_floordiv: Arc<WFunc>,
    pub f64_mod: Arc<WFunc>,
    pub f64_neg: Arc<WFunc>,
    pub f64_eq: Arc<WFunc>,
    pub f64_ne: Arc<WFunc>,
    pub f64_lt: Arc<WFunc>,
    pub f64_le: Arc<WFunc>,
    pub f64_gt: Arc<WFunc>,
    pub f64_ge: Arc<WFunc>,
    pub str_add: Arc<WFunc>,
    pub str_mul: Arc<WFunc>,
    pub str_eq: Arc<WFunc>,
    pub str_ne: Arc<WFunc>,
    pub str_getitem: Arc<WFunc>,
    pub str_len: Arc<WFunc>,
    pub str_hash: Arc<WFunc>,
    pub bool_eq: Arc<WFunc>,
    pub bool_ne: Arc<WFunc>,
    pub bool_not: Arc<WFunc>,
    pub object_is: Arc<WFunc>,
    pub object_isnot: Arc<WFunc>,
    pub i32_to_f64: Arc<WFunc>,
    pub i8_to_i32: Arc<WFunc>,
    pub i32_to_i8: Arc<WFunc>,
    pub f64_to_i32: Arc<WFunc>,
    pub i32_to_str: Arc<WFunc>,
    pub f64_to_str: Arc<WFunc>,
    pub bool_to_str: Arc<WFunc>,
    pub raise_: Arc<WFunc>,
}

/// The primitive type handles needed to spell operator signatures.
pub struct PrimTypes<'a> {
    pub i32: &'a Ty,
    pub i8: &'a Ty,
    pub f64: &'a Ty,
    pub bool: &'a Ty,
    pub str: &'a Ty,
    pub object: &'a Ty,
    pub exception: &'a Ty,
    pub none: &'a Ty,
}

/// A pure builtin: red, foldable when its arguments are blue.
pub fn pure_builtin(
    reg: &mut ModuleRegistry,
    name: &str,
    params: Vec<FuncParam>,
    restype: Ty,
    imp: impl Fn(&mut Vm, &[Value]) -> Result<Value> + Send + Sync + 'static,
) -> Arc<WFunc> {
    let functype = FuncType::new(params, restype, Color::Red, FuncKind::Plain);
    let fqn = spy_core::fqn::Fqn::new(reg.modname.clone(), name);
    let func = WFunc::builtin(fqn, functype, true, Arc::new(imp));
    reg.add(name, Value::Func(func.clone()));
    func
}

/// An impure builtin: its calls always stay in the residual program.
pub fn effect_builtin(
    reg: &mut ModuleRegistry,
    name: &str,
    params: Vec<FuncParam>,
    restype: Ty,
    imp: impl Fn(&mut Vm, &[Value]) -> Result<Value> + Send + Sync + 'static,
) -> Arc<WFunc> {
    let functype = FuncType::new(params, restype, Color::Red, FuncKind::Plain);
    let fqn = spy_core::fqn::Fqn::new(reg.modname.clone(), name);
    let func = WFunc::builtin(fqn, functype, false, Arc::new(imp));
    reg.add(name, Value::Func(func.clone()));
    func
}

fn unwrap_i32(name: &'static str, v: &Value) -> Result<i32> {
    v.as_i32().ok_or_else(|| bad_operand(name, v))
}

fn unwrap_f64(name: &'static str, v: &Value) -> Result<f64> {
    v.as_f64().ok_or_else(|| bad_operand(name, v))
}

fn unwrap_str<'a>(name: &'static str, v: &'a Value) -> Result<&'a WStr> {
    v.as_str().ok_or_else(|| bad_operand(name, v))
}

fn i32_op(
    reg: &mut ModuleRegistry,
    t: &PrimTypes<'_>,
    name: &'static str,
    restype: &Ty,
    f: fn(i32, i32) -> Result<Value>,
) -> Arc<WFunc> {
    let params = vec![
        FuncParam::simple("a", t.i32.clone()),
        FuncParam::simple("b", t.i32.clone()),
    ];
    pure_builtin(reg, name, params, restype.clone(), move |_vm, args| {
        f(unwrap_i32(name, &args[0])?, unwrap_i32(name, &args[1])?)
    })
}

fn f64_op(
    reg: &mut ModuleRegistry,
    t: &PrimTypes<'_>,
    name: &'static str,
    restype: &Ty,
    f: fn(f64, f64) -> Result<Value>,
) -> Arc<WFunc> {
    let params = vec![
        FuncParam::simple("a", t.f64.clone()),
        FuncParam::simple("b", t.f64.clone()),
    ];
    pure_builtin(reg, name, params, restype.clone(), move |_vm, args| {
        f(unwrap_f64(name, &args[0])?, unwrap_f64(name, &args[1])?)
    })
}

/// Register the operator functions. Scalar operators land in `reg` (the
/// `operator` module); the string functions land in `str_reg`, mirroring the
/// runtime library's `str::*` entry points.
pub fn register_operator_funcs(
    reg: &mut ModuleRegistry,
    str_reg: &mut ModuleRegistry,
    t: &PrimTypes<'_>,
) -> OperatorFuncs {
    let i32_ty = t.i32;
    let f64_ty = t.f64;
    let bool_ty = t.bool;
    let str_ty = t.str;

    let funcs = OperatorFuncs {
        i32_add: i32_op(reg, t, "i32_add", i32_ty, |a, b| {
            Ok(Value::I32(a.wrapping_add(b)))
        }),
        i32_sub: i32_op(reg, t, "i32_sub", i32_ty, |a, b| {
            Ok(Value::I32(a.wrapping_sub(b)))
        }),
        i32_mul: i32_op(reg, t, "i32_mul", i32_ty, |a, b| {
            Ok(Value::I32(a.wrapping_mul(b)))
        }),
        // true division: the result type is f64, and /0 panics
        i32_div: i32_op(reg, t, "i32_div", f64_ty, |a, b| {
            if b == 0 {
                Err(zero_division())
            } else {
                Ok(Value::F64(a as f64 / b as f64))
            }
        }),
        i32_floordiv: i32_op(reg, t, "i32_floordiv", i32_ty, |a, b| {
            i32_floordiv(a, b).map(Value::I32)
        }),
        i32_mod: i32_op(reg, t, "i32_mod", i32_ty, |a, b| i32_mod(a, b).map(Value::I32)),
        i32_neg: pure_builtin(
            reg,
            "i32_neg",
            vec![FuncParam::simple("x", i32_ty.clone())],
            i32_ty.clone(),
            |_vm, args| Ok(Value::I32(unwrap_i32("i32_neg", &args[0])?.wrapping_neg())),
        ),
        i32_eq: i32_op(reg, t, "i32_eq", bool_ty, |a, b| Ok(Value::Bool(a == b))),
        i32_ne: i32_op(reg, t, "i32_ne", bool_ty, |a, b| Ok(Value::Bool(a != b))),
        i32_lt: i32_op(reg, t, "i32_lt", bool_ty, |a, b| Ok(Value::Bool(a < b))),
        i32_le: i32_op(reg, t, "i32_le", bool_ty, |a, b| Ok(Value::Bool(a <= b))),
        i32_gt: i32_op(reg, t, "i32_gt", bool_ty, |a, b| Ok(Value::Bool(a > b))),
        i32_ge: i32_op(reg, t, "i32_ge", bool_ty, |a, b| Ok(Value::Bool(a >= b))),

        f64_add: f64_op(reg, t, "f64_add", f64_ty, |a, b| Ok(Value::F64(a + b))),
        f64_sub: f64_op(reg, t, "f64_sub", f64_ty, |a, b| Ok(Value::F64(a - b))),
        f64_mul: f64_op(reg, t, "f64_mul", f64_ty, |a, b| Ok(Value::F64(a * b))),
        f64_div: f64_op(reg, t, "f64_div", f64_ty, |a, b| {
            if b == 0.0 {
                Err(zero_division())
            } else {
                Ok(Value::F64(a / b))
            }
        }),
        f64_floordiv: f64_op(reg, t, "f64_floordiv", f64_ty, |a, b| {
            f64_floordiv(a, b).map(Value::F64)
        }),
        f64_mod: f64_op(reg, t, "f64_mod", f64_ty, |a, b| f64_mod(a, b).map(Value::F64)),
        f64_neg: pure_builtin(
            reg,
            "f64_neg",
            vec![FuncParam::simple("x", f64_ty.clone())],
            f64_ty.clone(),
            |_vm, args| Ok(Value::F64(-unwrap_f64("f64_neg", &args[0])?)),
        ),
        f64_eq: f64_op(reg, t, "f64_eq", bool_ty, |a, b| Ok(Value::Bool(a == b))),
        f64_ne: f64_op(reg, t, "f64_ne", bool_ty, |a, b| Ok(Value::Bool(a != b))),
        f64_lt: f64_op(reg, t, "f64_lt", bool_ty, |a, b| Ok(Value::Bool(a < b))),
        f64_le: f64_op(reg, t, "f64_le", bool_ty, |a, b| Ok(Value::Bool(a <= b))),
        f64_gt: f64_op(reg, t, "f64_gt", bool_ty, |a, b| Ok(Value::Bool(a > b))),
        f64_ge: f64_op(reg, t, "f64_ge", bool_ty, |a, b| Ok(Value::Bool(a >= b))),

        str_add: pure_builtin(
            str_reg,
            "add",
            vec![
                FuncParam::simple("a", str_ty.clone()),
                FuncParam::simple("b", str_ty.clone()),
            ],
            str_ty.clone(),
            |_vm, args| {
                let a = unwrap_str("str_add", &args[0])?;
                let b = unwrap_str("str_add", &args[1])?;
                Ok(Value::Str(a.concat(b)))
            },
        ),
        str_mul: pure_builtin(
            str_reg,
            "mul",
            vec![
                FuncParam::simple("s", str_ty.clone()),
                FuncParam::simple("n", i32_ty.clone()),
            ],
            str_ty.clone(),
            |_vm, args| {
                let s = unwrap_str("str_mul", &args[0])?;
                let n = unwrap_i32("str_mul", &args[1])?;
                Ok(Value::Str(s.repeat(n)))
            },
        ),
        str_eq: pure_builtin(
            str_reg,
            "eq",
            vec![
                FuncParam::simple("a", str_ty.clone()),
                FuncParam::simple("b", str_ty.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| {
                let a = unwrap_str("str_eq", &args[0])?;
                let b = unwrap_str("str_eq", &args[1])?;
                Ok(Value::Bool(a == b))
            },
        ),
        str_ne: pure_builtin(
            str_reg,
            "ne",
            vec![
                FuncParam::simple("a", str_ty.clone()),
                FuncParam::simple("b", str_ty.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| {
                let a = unwrap_str("str_ne", &args[0])?;
                let b = unwrap_str("str_ne", &args[1])?;
                Ok(Value::Bool(a != b))
            },
        ),
        str_getitem: pure_builtin(
            str_reg,
            "getitem",
            vec![
                FuncParam::simple("s", str_ty.clone()),
                FuncParam::simple("i", i32_ty.clone()),
            ],
            str_ty.clone(),
            |_vm, args| {
                let s = unwrap_str("str_getitem", &args[0])?;
                let i = unwrap_i32("str_getitem", &args[1])?;
                Ok(Value::Str(s.getitem(i)?))
            },
        ),
        str_len: pure_builtin(
            str_reg,
            "len",
            vec![FuncParam::simple("s", str_ty.clone())],
            i32_ty.clone(),
            |_vm, args| Ok(Value::I32(unwrap_str("str_len", &args[0])?.len())),
        ),
        str_hash: pure_builtin(
            str_reg,
            "hash",
            vec![FuncParam::simple("s", str_ty.clone())],
            i32_ty.clone(),
            |_vm, args| Ok(Value::I32(unwrap_str("str_hash", &args[0])?.hash())),
        ),

        bool_eq: pure_builtin(
            reg,
            "bool_eq",
            vec![
                FuncParam::simple("a", bool_ty.clone()),
                FuncParam::simple("b", bool_ty.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| Ok(Value::Bool(args[0].as_bool() == args[1].as_bool())),
        ),
        bool_ne: pure_builtin(
            reg,
            "bool_ne",
            vec![
                FuncParam::simple("a", bool_ty.clone()),
                FuncParam::simple("b", bool_ty.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| Ok(Value::Bool(args[0].as_bool() != args[1].as_bool())),
        ),
        bool_not: pure_builtin(
            reg,
            "bool_not",
            vec![FuncParam::simple("x", bool_ty.clone())],
            bool_ty.clone(),
            |_vm, args| match args[0].as_bool() {
                Some(b) => Ok(Value::Bool(!b)),
                None => Err(bad_operand("bool_not", &args[0])),
            },
        ),

        // reference identity, the fallback for `==` between reference types
        object_is: pure_builtin(
            reg,
            "object_is",
            vec![
                FuncParam::simple("a", t.object.clone()),
                FuncParam::simple("b", t.object.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| Ok(Value::Bool(args[0].cache_key() == args[1].cache_key())),
        ),
        object_isnot: pure_builtin(
            reg,
            "object_isnot",
            vec![
                FuncParam::simple("a", t.object.clone()),
                FuncParam::simple("b", t.object.clone()),
            ],
            bool_ty.clone(),
            |_vm, args| Ok(Value::Bool(args[0].cache_key() != args[1].cache_key())),
        ),

        i32_to_f64: pure_builtin(
            reg,
            "i32_to_f64",
            vec![FuncParam::simple("x", i32_ty.clone())],
            f64_ty.clone(),
            |_vm, args| Ok(Value::F64(unwrap_i32("i32_to_f64", &args[0])? as f64)),
        ),
        i8_to_i32: pure_builtin(
            reg,
            "i8_to_i32",
            vec![FuncParam::simple("x", t.i8.clone())],
            i32_ty.clone(),
            |_vm, args| match &args[0] {
                Value::I8(x) => Ok(Value::I32(*x as i32)),
                other => Err(bad_operand("i8_to_i32", other)),
            },
        ),
        i32_to_i8: pure_builtin(
            reg,
            "i32_to_i8",
            vec![FuncParam::simple("x", i32_ty.clone())],
            t.i8.clone(),
            |_vm, args| Ok(Value::I8(unwrap_i32("i32_to_i8", &args[0])? as i8)),
        ),
        f64_to_i32: pure_builtin(
            reg,
            "f64_to_i32",
            vec![FuncParam::simple("x", f64_ty.clone())],
            i32_ty.clone(),
            |_vm, args| Ok(Value::I32(f64_to_i32(unwrap_f64("f64_to_i32", &args[0])?))),
        ),

        i32_to_str: pure_builtin(
            reg,
            "i32_to_str",
            vec![FuncParam::simple("x", i32_ty.clone())],
            str_ty.clone(),
            |_vm, args| Ok(Value::str(unwrap_i32("i32_to_str", &args[0])?.to_string())),
        ),
        f64_to_str: pure_builtin(
            reg,
            "f64_to_str",
            vec![FuncParam::simple("x", f64_ty.clone())],
            str_ty.clone(),
            |_vm, args| Ok(Value::str(args[0].to_string())),
        ),
        bool_to_str: pure_builtin(
            reg,
            "bool_to_str",
            vec![FuncParam::simple("x", bool_ty.clone())],
            str_ty.clone(),
            |_vm, args| Ok(Value::str(args[0].to_string())),
        ),

        // the runtime's `operator::raise`: unwinds with the given exception,
        // anchored at the raise site by the frame
        raise_: effect_builtin(
            reg,
            "raise",
            vec![FuncParam::simple("exc", t.exception.clone())],
            t.none.clone(),
            |_vm, args| match &args[0] {
                Value::Exception(exc) => {
                    let mut err = spy_core::error::SpyError::new(exc.kind(), exc.message.clone());
                    err.annotations = exc.annotations.clone();
                    Err(err.into())
                }
                other => Err(bad_operand("raise", other)),
            },
        ),
    };

    funcs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(i32_floordiv(7, 2).unwrap(), 3);
        assert_eq!(i32_floordiv(-7, 2).unwrap(), -4);
        assert_eq!(i32_floordiv(7, -2).unwrap(), -4);
        assert_eq!(i32_floordiv(-7, -2).unwrap(), 3);
        assert!(i32_floordiv(1, 0).is_err());
    }

    #[test]
    fn modulo_has_sign_of_divisor() {
        assert_eq!(i32_mod(7, 2).unwrap(), 1);
        assert_eq!(i32_mod(-7, 2).unwrap(), 1);
        assert_eq!(i32_mod(7, -2).unwrap(), -1);
        assert_eq!(i32_mod(-7, -2).unwrap(), -1);
        assert!(i32_mod(1, 0).is_err());
    }

    #[test]
    fn floordiv_mod_identity() {
        for a in [-17, -7, -1, 0, 1, 7, 17, i32::MAX, i32::MIN] {
            for b in [-5, -2, -1, 1, 2, 5] {
                let q = i32_floordiv(a, b).unwrap();
                let r = i32_mod(a, b).unwrap();
                assert_eq!(q.wrapping_mul(b).wrapping_add(r), a, "a={} b={}", a, b);
                if r != 0 {
                    assert_eq!(r.signum(), b.signum(), "a={} b={}", a, b);
                }
            }
        }
    }

    #[test]
    fn f64_to_i32_saturates() {
        assert_eq!(f64_to_i32(f64::NAN), 0);
        assert_eq!(f64_to_i32(1e12), i32::MAX);
        assert_eq!(f64_to_i32(-1e12), i32::MIN);
        assert_eq!(f64_to_i32(f64::INFINITY), i32::MAX);
        assert_eq!(f64_to_i32(f64::NEG_INFINITY), i32::MIN);
        assert_eq!(f64_to_i32(3.9), 3);
        assert_eq!(f64_to_i32(-3.9), -3);
    }

    #[test]
    fn f64_mod_matches_floor_semantics() {
        assert_eq!(f64_mod(-7.0, 2.0).unwrap(), 1.0);
        assert_eq!(f64_floordiv(-7.0, 2.0).unwrap(), -4.0);
        assert!(f64_mod(1.0, 0.0).is_err());
    }
}
