//! The OPERATORs: blue metafunctions resolving every call site.
//!
//! For each operation the frame calls `operator::ADD`, `operator::CALL`,
//! `operator::GETATTR`, ... with one [`OpArg`] per operand; the OPERATOR
//! picks an implementation and the typechecker freezes it into an
//! [`OpImpl`]. Candidate order for a binary `a OP b`:
//!
//! 1. the primitive multimethod table;
//! 2. the left operand type's `__OP__` metafunction (or plain `__op__`);
//! 3. the right operand type's `__rOP__` (or `__rop__`);
//! 4. no candidate left: a compile-time type error.
//!
//! NULL is the sentinel for "I don't handle this, try the next candidate".
//! Because OPERATORs are blue and memoized, dispatch for fixed operand types
//! always resolves to the same FQN.

use std::sync::Arc;

use spy_core::ast::{Color, FuncKind};
use spy_core::error::{Error, ErrorKind, Result};
use spy_core::fqn::Fqn;

use crate::module::ModuleRegistry;
use crate::opimpl::{direct_call_opimpl, typecheck_opspec, Dispatch, OpImpl};
use crate::opspec::{OpArg, OpSpec};
use crate::value::{FuncParam, FuncType, Ty, TyKind, Value, WFunc};
use crate::vm::Vm;

/// Handles on the OPERATOR functions themselves, used by frames.
#[derive(Debug, Clone)]
pub struct Operators {
    pub add: Arc<WFunc>,
    pub sub: Arc<WFunc>,
    pub mul: Arc<WFunc>,
    pub div: Arc<WFunc>,
    pub floordiv: Arc<WFunc>,
    pub modulo: Arc<WFunc>,
    pub eq: Arc<WFunc>,
    pub ne: Arc<WFunc>,
    pub lt: Arc<WFunc>,
    pub le: Arc<WFunc>,
    pub gt: Arc<WFunc>,
    pub ge: Arc<WFunc>,
    pub neg: Arc<WFunc>,
    pub not: Arc<WFunc>,
    pub str_conv: Arc<WFunc>,
    pub call: Arc<WFunc>,
    pub call_method: Arc<WFunc>,
    pub getattr: Arc<WFunc>,
    pub setattr: Arc<WFunc>,
    pub getitem: Arc<WFunc>,
    pub setitem: Arc<WFunc>,
    pub raise_: Arc<WFunc>,
}

fn extract_opargs(args: &[Value]) -> Result<Vec<OpArg>> {
    args.iter()
        .map(|v| match v {
            Value::OpArg(arg) => Ok((**arg).clone()),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("OPERATOR called with a non-oparg operand: {}", other),
            )),
        })
        .collect()
}

/// Register one OPERATOR: a blue variadic function from opargs to an opimpl.
fn operator(
    reg: &mut ModuleRegistry,
    oparg_ty: &Ty,
    opimpl_ty: &Ty,
    name: &str,
    imp: impl Fn(&mut Vm, &[OpArg]) -> Result<Arc<OpImpl>> + Send + Sync + 'static,
) -> Arc<WFunc> {
    let functype = FuncType::new(
        vec![FuncParam::variadic("args", oparg_ty.clone())],
        opimpl_ty.clone(),
        Color::Blue,
        FuncKind::Plain,
    );
    let fqn = Fqn::new(reg.modname.clone(), name);
    let func = WFunc::builtin(
        fqn,
        functype,
        false,
        Arc::new(move |vm: &mut Vm, args: &[Value]| {
            let opargs = extract_opargs(args)?;
            imp(vm, &opargs).map(|opimpl| Value::OpImpl(opimpl))
        }),
    );
    reg.add(name, Value::Func(func.clone()));
    func
}

/// Capability names for a binary operator token:
/// `(__OP__, __op__, __rOP__, __rop__)`.
fn capability_names(token: &str) -> (&'static str, &'static str, &'static str, &'static str) {
    match token {
        "+" => ("__ADD__", "__add__", "__RADD__", "__radd__"),
        "-" => ("__SUB__", "__sub__", "__RSUB__", "__rsub__"),
        "*" => ("__MUL__", "__mul__", "__RMUL__", "__rmul__"),
        "/" => ("__TRUEDIV__", "__truediv__", "__RTRUEDIV__", "__rtruediv__"),
        "//" => ("__FLOORDIV__", "__floordiv__", "__RFLOORDIV__", "__rfloordiv__"),
        "%" => ("__MOD__", "__mod__", "__RMOD__", "__rmod__"),
        "==" => ("__EQ__", "__eq__", "__EQ__", "__eq__"),
        "!=" => ("__NE__", "__ne__", "__NE__", "__ne__"),
        "<" => ("__LT__", "__lt__", "__GT__", "__gt__"),
        "<=" => ("__LE__", "__le__", "__GE__", "__ge__"),
        ">" => ("__GT__", "__gt__", "__LT__", "__lt__"),
        ">=" => ("__GE__", "__ge__", "__LE__", "__le__"),
        _ => unreachable!("unknown binary operator token: {}", token),
    }
}

/// Consult one type's capability table: an upper-case entry is a
/// metafunction to call, a lower-case one a plain implementation.
fn capability_opspec(
    vm: &mut Vm,
    ty: &Ty,
    upper: &str,
    lower: &str,
    args: &[OpArg],
) -> Result<Option<OpSpec>> {
    if let Some(metafunc) = ty.lookup_func(upper) {
        let spec = vm.fast_metacall(&metafunc, args)?;
        return Ok(Some(spec));
    }
    if let Some(func) = ty.lookup_func(lower) {
        return Ok(Some(OpSpec::complex(func, args.to_vec())));
    }
    Ok(None)
}

fn binop_opspec(vm: &mut Vm, token: &'static str, args: &[OpArg]) -> Result<OpSpec> {
    let (l, r) = (&args[0], &args[1]);
    if let Some(spec) = vm.builtins().mm.lookup(token, &l.static_ty, &r.static_ty) {
        return Ok(spec);
    }
    let (upper, lower, rupper, rlower) = capability_names(token);
    let lty = l.static_ty.clone();
    if let Some(spec) = capability_opspec(vm, &lty, upper, lower, args)? {
        if !spec.is_null() {
            return Ok(spec);
        }
    }
    let rty = r.static_ty.clone();
    if let Some(spec) = capability_opspec(vm, &rty, rupper, rlower, args)? {
        if !spec.is_null() {
            return Ok(spec);
        }
    }
    Ok(OpSpec::Null)
}

/// `==`/`!=` get one extra fallback: if the operand types share a reference
/// ancestor, identity comparison applies — in particular, exception values
/// of *different* types compare unequal instead of failing to dispatch.
fn eq_opspec(vm: &mut Vm, token: &'static str, args: &[OpArg]) -> Result<OpSpec> {
    let (l, r) = (&args[0], &args[1]);
    let (upper, lower, _, _) = capability_names(token);
    let lty = l.static_ty.clone();
    if let Some(spec) = capability_opspec(vm, &lty, upper, lower, args)? {
        if !spec.is_null() {
            return Ok(spec);
        }
    }
    let common = vm.union_type(&l.static_ty, &r.static_ty);
    if common != vm.builtins().object && common.is_reference_type() {
        let func = if token == "==" {
            vm.builtins().funcs.object_is.clone()
        } else {
            vm.builtins().funcs.object_isnot.clone()
        };
        return Ok(OpSpec::simple(func));
    }
    if let Some(spec) = vm.builtins().mm.lookup(token, &l.static_ty, &r.static_ty) {
        return Ok(spec);
    }
    Ok(OpSpec::Null)
}

fn binary_operator(
    reg: &mut ModuleRegistry,
    oparg_ty: &Ty,
    opimpl_ty: &Ty,
    name: &str,
    token: &'static str,
) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, name, move |vm, args| {
        let spec = binop_opspec(vm, token, args)?;
        let errmsg = format!("cannot do `{{0}}` {} `{{1}}`", token);
        typecheck_opspec(vm, spec, args, args[0].span, Dispatch::Multi, &errmsg)
    })
}

fn eq_operator(
    reg: &mut ModuleRegistry,
    oparg_ty: &Ty,
    opimpl_ty: &Ty,
    name: &str,
    token: &'static str,
) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, name, move |vm, args| {
        let spec = eq_opspec(vm, token, args)?;
        let errmsg = format!("cannot do `{{0}}` {} `{{1}}`", token);
        typecheck_opspec(vm, spec, args, args[0].span, Dispatch::Multi, &errmsg)
    })
}

fn unary_operator(
    reg: &mut ModuleRegistry,
    oparg_ty: &Ty,
    opimpl_ty: &Ty,
    name: &str,
    token: &'static str,
    errmsg: &'static str,
) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, name, move |vm, args| {
        let spec = vm
            .builtins()
            .mm
            .lookup_unary(token, &args[0].static_ty)
            .unwrap_or(OpSpec::Null);
        typecheck_opspec(vm, spec, args, args[0].span, Dispatch::Single, errmsg)
    })
}

/// A generic function invocation at dispatch time: all arguments must be
/// blue; the memoized result becomes a constant of the call site.
fn generic_call(vm: &mut Vm, func_arg: &OpArg, args: &[OpArg]) -> Result<OpSpec> {
    let func = match func_arg.blue_value()? {
        Value::Func(f) => f.clone(),
        other => {
            return Err(Error::spy(
                ErrorKind::Type,
                format!("not a generic function: {}", other),
            ))
        }
    };
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg.blue_value()?.clone());
    }
    let result = vm.fast_call(&func, &values)?;
    Ok(OpSpec::const_(result))
}

fn call_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "CALL", move |vm, args| {
        let wam_func = &args[0];
        let rest = &args[1..];
        let fty = wam_func.static_ty.clone();
        let errmsg = "cannot call objects of type `{0}`";

        if let Some(functype) = fty.as_functype() {
            match functype.kind {
                FuncKind::Plain => {
                    if wam_func.is_blue() {
                        let func = match wam_func.value() {
                            Value::Func(f) => f.clone(),
                            other => {
                                return Err(Error::spy(
                                    ErrorKind::Type,
                                    format!("not callable: {}", other),
                                ))
                            }
                        };
                        let spec = OpSpec::complex(func, rest.to_vec());
                        return typecheck_opspec(
                            vm,
                            spec,
                            args,
                            wam_func.span,
                            Dispatch::Single,
                            errmsg,
                        );
                    }
                    return direct_call_opimpl(vm, functype, args);
                }
                FuncKind::Metafunc => {
                    let func = match wam_func.blue_value()? {
                        Value::Func(f) => f.clone(),
                        other => {
                            return Err(Error::spy(
                                ErrorKind::Type,
                                format!("not callable: {}", other),
                            ))
                        }
                    };
                    let spec = vm.fast_metacall(&func, rest)?;
                    return typecheck_opspec(
                        vm,
                        spec,
                        args,
                        wam_func.span,
                        Dispatch::Single,
                        errmsg,
                    );
                }
                FuncKind::Generic => {
                    let spec = generic_call(vm, wam_func, rest)?;
                    return typecheck_opspec(
                        vm,
                        spec,
                        args,
                        wam_func.span,
                        Dispatch::Single,
                        errmsg,
                    );
                }
            }
        }

        // calling a type constructs an instance
        if matches!(fty.kind(), TyKind::Type) {
            let ty = wam_func.blue_type()?;
            let spec = if let Some(metafunc) = ty.lookup_func("__NEW__") {
                vm.fast_metacall(&metafunc, args)?
            } else if let Some(new) = ty.lookup_func("__new__") {
                OpSpec::complex(new, rest.to_vec())
            } else {
                OpSpec::Null
            };
            let errmsg = format!("cannot instantiate `{}`", ty.human_name());
            return typecheck_opspec(vm, spec, args, wam_func.span, Dispatch::Single, &errmsg);
        }

        let spec = capability_opspec(vm, &fty, "__CALL__", "__call__", args)?.unwrap_or(OpSpec::Null);
        typecheck_opspec(vm, spec, args, wam_func.span, Dispatch::Single, errmsg)
    })
}

fn call_method_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "CALL_METHOD", move |vm, args| {
        let wam_obj = &args[0];
        let wam_meth = &args[1];
        let rest = &args[2..];
        let meth = wam_meth.blue_str()?.to_string();

        // static call: `T.__make__(...)`, `Foo.__lift__(...)`
        if wam_obj.is_blue() {
            if let Value::Type(ty) = wam_obj.value() {
                if let Some(Value::Func(func)) = ty.lookup(&meth) {
                    let spec = OpSpec::complex(func, rest.to_vec());
                    let errmsg = format!("method `{{0}}::{}` does not exist", meth);
                    return typecheck_opspec(
                        vm,
                        spec,
                        args,
                        wam_obj.span,
                        Dispatch::Single,
                        &errmsg,
                    );
                }
            }
        }

        let oty = wam_obj.static_ty.clone();
        let spec = match oty.lookup(&meth) {
            Some(Value::Func(func)) => {
                let mut call_args = vec![wam_obj.clone()];
                call_args.extend(rest.iter().cloned());
                OpSpec::complex(func, call_args)
            }
            _ => OpSpec::Null,
        };
        let errmsg = format!("method `{{0}}::{}` does not exist", meth);
        typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, &errmsg)
    })
}

fn getattr_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "GETATTR", move |vm, args| {
        let wam_obj = &args[0];
        let wam_name = &args[1];
        let name = wam_name.blue_str().unwrap_or("<unknown>").to_string();
        let oty = wam_obj.static_ty.clone();

        let spec = if let Some(metafunc) = oty.lookup_func("__GETATTR__") {
            vm.fast_metacall(&metafunc, args)?
        } else if let Some(getter) = oty
            .is_struct()
            .then(|| oty.lookup_func(&format!("__get_{}__", name)))
            .flatten()
        {
            // by-value struct field read
            OpSpec::complex(getter, vec![wam_obj.clone()])
        } else if let Some(value) = oty.lookup(&name) {
            OpSpec::const_(value)
        } else if wam_obj.is_blue() {
            match wam_obj.value() {
                Value::Module(module) => match module.getattr_maybe(&name) {
                    Some(value) => OpSpec::const_(value),
                    None => OpSpec::Null,
                },
                _ => OpSpec::Null,
            }
        } else {
            OpSpec::Null
        };

        let errmsg = format!("type `{{0}}` has no attribute '{}'", name);
        typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, &errmsg)
    })
}

fn setattr_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "SETATTR", move |vm, args| {
        let wam_obj = &args[0];
        let wam_name = &args[1];
        let name = wam_name.blue_str().unwrap_or("<unknown>").to_string();
        let oty = wam_obj.static_ty.clone();

        let spec = if let Some(metafunc) = oty.lookup_func("__SETATTR__") {
            vm.fast_metacall(&metafunc, args)?
        } else {
            // structs are by-value and immutable: assigning through a
            // pointer works (the pointer type has __SETATTR__), assigning on
            // the value does not
            OpSpec::Null
        };

        let errmsg = format!(
            "type `{{0}}` does not support assignment to attribute '{}'",
            name
        );
        typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, &errmsg)
    })
}

fn getitem_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "GETITEM", move |vm, args| {
        let wam_obj = &args[0];
        let rest = &args[1..];
        let oty = wam_obj.static_ty.clone();
        let errmsg = "cannot index objects of type `{0}`";

        // generic function instantiation: `Matrix[i32, 2, 3]`
        if let Some(functype) = oty.as_functype() {
            if functype.kind == FuncKind::Generic {
                let spec = generic_call(vm, wam_obj, rest)?;
                return typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, errmsg);
            }
        }

        // generic type instantiation: `list[i32]`
        if wam_obj.is_blue() {
            if let Value::Type(ty) = wam_obj.value() {
                if let Some(metafunc) = ty.lookup_func("__CLASS_GETITEM__") {
                    let spec = vm.fast_metacall(&metafunc, args)?;
                    return typecheck_opspec(
                        vm,
                        spec,
                        args,
                        wam_obj.span,
                        Dispatch::Single,
                        errmsg,
                    );
                }
            }
        }

        let spec = capability_opspec(vm, &oty, "__GETITEM__", "__getitem__", args)?
            .unwrap_or(OpSpec::Null);
        typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, errmsg)
    })
}

fn setitem_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "SETITEM", move |vm, args| {
        let wam_obj = &args[0];
        let oty = wam_obj.static_ty.clone();
        let spec = capability_opspec(vm, &oty, "__SETITEM__", "__setitem__", args)?
            .unwrap_or(OpSpec::Null);
        let errmsg = "type `{0}` does not support item assignment";
        typecheck_opspec(vm, spec, args, wam_obj.span, Dispatch::Single, errmsg)
    })
}

fn raise_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    operator(reg, oparg_ty, opimpl_ty, "RAISE", move |vm, args| {
        let wam_exc = &args[0];
        if !wam_exc.static_ty.is_exception() {
            let errmsg = "cannot raise objects of type `{0}`";
            return typecheck_opspec(
                vm,
                OpSpec::Null,
                args,
                wam_exc.span,
                Dispatch::Single,
                errmsg,
            );
        }
        // the exception value must be known at compile time, so that the
        // emitter can reference it as a prebuilt constant
        wam_exc.blue_value()?;
        let spec = OpSpec::simple(vm.builtins().funcs.raise_.clone());
        typecheck_opspec(vm, spec, args, wam_exc.span, Dispatch::Single, "unreachable")
    })
}

fn str_operator(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Arc<WFunc> {
    unary_operator(
        reg,
        oparg_ty,
        opimpl_ty,
        "STR",
        "str",
        "cannot convert `{0}` to str",
    )
}

pub fn register_operators(reg: &mut ModuleRegistry, oparg_ty: &Ty, opimpl_ty: &Ty) -> Operators {
    Operators {
        add: binary_operator(reg, oparg_ty, opimpl_ty, "ADD", "+"),
        sub: binary_operator(reg, oparg_ty, opimpl_ty, "SUB", "-"),
        mul: binary_operator(reg, oparg_ty, opimpl_ty, "MUL", "*"),
        div: binary_operator(reg, oparg_ty, opimpl_ty, "DIV", "/"),
        floordiv: binary_operator(reg, oparg_ty, opimpl_ty, "FLOORDIV", "//"),
        modulo: binary_operator(reg, oparg_ty, opimpl_ty, "MOD", "%"),
        eq: eq_operator(reg, oparg_ty, opimpl_ty, "EQ", "=="),
        ne: eq_operator(reg, oparg_ty, opimpl_ty, "NE", "!="),
        lt: binary_operator(reg, oparg_ty, opimpl_ty, "LT", "<"),
        le: binary_operator(reg, oparg_ty, opimpl_ty, "LE", "<="),
        gt: binary_operator(reg, oparg_ty, opimpl_ty, "GT", ">"),
        ge: binary_operator(reg, oparg_ty, opimpl_ty, "GE", ">="),
        neg: unary_operator(
            reg,
            oparg_ty,
            opimpl_ty,
            "NEG",
            "neg",
            "cannot negate `{0}`",
        ),
        not: unary_operator(
            reg,
            oparg_ty,
            opimpl_ty,
            "NOT",
            "not",
            "operator `not` requires `bool`, got `{0}`",
        ),
        str_conv: str_operator(reg, oparg_ty, opimpl_ty),
        call: call_operator(reg, oparg_ty, opimpl_ty),
        call_method: call_method_operator(reg, oparg_ty, opimpl_ty),
        getattr: getattr_operator(reg, oparg_ty, opimpl_ty),
        setattr: setattr_operator(reg, oparg_ty, opimpl_ty),
        getitem: getitem_operator(reg, oparg_ty, opimpl_ty),
        setitem: setitem_operator(reg, oparg_ty, opimpl_ty),
        raise_: raise_operator(reg, oparg_ty, opimpl_ty),
    }
}

/// Map a binary token to its OPERATOR.
impl Operators {
    pub fn from_binop(&self, op: spy_core::ast::BinOpKind) -> &Arc<WFunc> {
        use spy_core::ast::BinOpKind::*;
        match op {
            Add => &self.add,
            Sub => &self.sub,
            Mul => &self.mul,
            Div => &self.div,
            FloorDiv => &self.floordiv,
            Mod => &self.modulo,
        }
    }

    pub fn from_cmpop(&self, op: spy_core::ast::CmpOpKind) -> &Arc<WFunc> {
        use spy_core::ast::CmpOpKind::*;
        match op {
            Eq => &self.eq,
            Ne => &self.ne,
            Lt => &self.lt,
            Le => &self.le,
            Gt => &self.gt,
            Ge => &self.ge,
        }
    }

    pub fn from_unaryop(&self, op: spy_core::ast::UnaryOpKind) -> &Arc<WFunc> {
        use spy_core::ast::UnaryOpKind::*;
        match op {
            Neg => &self.neg,
            Not => &self.not,
        }
    }
}
