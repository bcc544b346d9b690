//! The builtin modules installed into every VM: `builtins` (primitive types,
//! `print`, `len`, `range`, `list`, the exception hierarchy), `operator` (the
//! concrete operator functions and the OPERATOR metafunctions), `str` (the
//! string runtime entry points) and `unsafe` (`gc_alloc` and pointer types).

pub mod convop;
pub mod dispatch;
pub mod multimethod;
pub mod operators;
pub mod unsafe_mod;

use std::sync::Arc;

use spy_core::ast::{Color, FuncKind};
use spy_core::error::{Error, ErrorKind, Result};
use spy_core::fqn::Fqn;

use crate::module::ModuleRegistry;
use crate::opspec::{OpArg, OpSpec};
use crate::value::{
    FuncParam, FuncType, StructField, Ty, TyBody, TyKind, Value, WFunc, WStruct,
};
use crate::vm::Vm;

use self::dispatch::Operators;
use self::multimethod::MultiMethodTable;
use self::operators::{effect_builtin, pure_builtin, OperatorFuncs, PrimTypes};

/// All the singletons a VM needs at hand: primitive type handles, the
/// multimethod table, the operator functions and the OPERATORs.
#[derive(Debug)]
pub struct Builtins {
    pub object: Ty,
    pub type_ty: Ty,
    pub module_ty: Ty,
    pub none_ty: Ty,
    pub i32: Ty,
    pub i8: Ty,
    pub f64: Ty,
    pub bool: Ty,
    pub str: Ty,
    pub tuple_ty: Ty,
    pub exception: Ty,
    pub static_error: Ty,
    pub type_error: Ty,
    pub value_error: Ty,
    pub index_error: Ty,
    pub oparg_ty: Ty,
    pub opspec_ty: Ty,
    pub opimpl_ty: Ty,
    pub range_ty: Ty,
    pub range_iter_ty: Ty,
    pub list_base: Ty,
    pub mm: MultiMethodTable,
    pub funcs: OperatorFuncs,
    pub ops: Operators,
    pub print_str: Arc<WFunc>,
    pub print_i32: Arc<WFunc>,
    pub print_f64: Arc<WFunc>,
    pub print_bool: Arc<WFunc>,
    pub print_none: Arc<WFunc>,
}

impl Builtins {
    /// The exception type for an error kind, used when user code raises.
    pub fn exception_ty(&self, name: &str) -> Option<Ty> {
        match name {
            "Exception" => Some(self.exception.clone()),
            "StaticError" => Some(self.static_error.clone()),
            "TypeError" => Some(self.type_error.clone()),
            "ValueError" => Some(self.value_error.clone()),
            "IndexError" => Some(self.index_error.clone()),
            _ => None,
        }
    }
}

/// A blue metafunction: `(vm, *oparg) -> opspec`.
pub fn metafunc(
    fqn: Fqn,
    oparg_ty: &Ty,
    opspec_ty: &Ty,
    imp: impl Fn(&mut Vm, &[OpArg]) -> Result<OpSpec> + Send + Sync + 'static,
) -> Arc<WFunc> {
    let functype = FuncType::new(
        vec![FuncParam::variadic("args", oparg_ty.clone())],
        opspec_ty.clone(),
        Color::Blue,
        FuncKind::Metafunc,
    );
    WFunc::builtin(
        fqn,
        functype,
        false,
        Arc::new(move |vm: &mut Vm, args: &[Value]| {
            let opargs: Vec<OpArg> = args
                .iter()
                .map(|v| match v {
                    Value::OpArg(arg) => Ok((**arg).clone()),
                    other => Err(Error::spy(
                        ErrorKind::Type,
                        format!("metafunction called with a non-oparg operand: {}", other),
                    )),
                })
                .collect::<Result<_>>()?;
            imp(vm, &opargs).map(OpSpec::into_value)
        }),
    )
}

fn prim(fqn: &str, size: u32, object: &Ty) -> Ty {
    let ty = Ty::declare(Fqn::parse(fqn), TyKind::Primitive);
    ty.define(TyBody {
        base: Some(object.clone()),
        size: Some(size),
        ..TyBody::default()
    });
    ty
}

fn exception_new(reg: &mut ModuleRegistry, ty: &Ty, str_ty: &Ty) -> Arc<WFunc> {
    let fqn = ty.fqn().join("__new__");
    let exc_ty = ty.clone();
    let functype = FuncType::new(
        vec![FuncParam::simple("message", str_ty.clone())],
        ty.clone(),
        Color::Blue,
        FuncKind::Plain,
    );
    let func = WFunc::builtin(
        fqn.clone(),
        functype,
        false,
        Arc::new(move |_vm: &mut Vm, args: &[Value]| match &args[0] {
            Value::Str(s) => Ok(Value::exception(exc_ty.clone(), s.as_str())),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("exception message must be `str`, got {}", other),
            )),
        }),
    );
    reg.add_hidden(fqn, Value::Func(func.clone()));
    func
}

pub fn create() -> (Builtins, Vec<ModuleRegistry>) {
    // ---- core types ----
    let object = Ty::declare(Fqn::parse("builtins::object"), TyKind::Object);
    object.define(TyBody::default());
    let type_ty = Ty::new(
        Fqn::parse("builtins::type"),
        TyKind::Type,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );
    let module_ty = Ty::new(
        Fqn::parse("builtins::module"),
        TyKind::Module,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );
    let none_ty = prim("builtins::NoneType", 0, &object);
    let i32_ty = prim("builtins::i32", 4, &object);
    let i8_ty = prim("builtins::i8", 1, &object);
    let f64_ty = prim("builtins::f64", 8, &object);
    let bool_ty = prim("builtins::bool", 1, &object);
    let str_ty = Ty::declare(Fqn::parse("builtins::str"), TyKind::Primitive);
    let tuple_ty = Ty::new(
        Fqn::parse("builtins::tuple"),
        TyKind::Tuple,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );

    let exception = Ty::declare(Fqn::parse("builtins::Exception"), TyKind::Exception);
    let static_error = Ty::declare(Fqn::parse("builtins::StaticError"), TyKind::Exception);
    let type_error = Ty::declare(Fqn::parse("builtins::TypeError"), TyKind::Exception);
    let value_error = Ty::declare(Fqn::parse("builtins::ValueError"), TyKind::Exception);
    let index_error = Ty::declare(Fqn::parse("builtins::IndexError"), TyKind::Exception);

    let oparg_ty = Ty::new(
        Fqn::parse("operator::OpArg"),
        TyKind::OpArg,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );
    let opspec_ty = Ty::new(
        Fqn::parse("operator::OpSpec"),
        TyKind::OpSpec,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );
    let opimpl_ty = Ty::new(
        Fqn::parse("operator::OpImpl"),
        TyKind::OpImpl,
        TyBody {
            base: Some(object.clone()),
            ..TyBody::default()
        },
    );

    let range_ty = Ty::declare(Fqn::parse("builtins::range"), TyKind::Struct);
    let range_iter_ty = Ty::declare(Fqn::parse("builtins::RangeIter"), TyKind::Struct);
    let list_base = Ty::declare(Fqn::parse("builtins::list"), TyKind::Object);

    // ---- the `operator` and `str` modules ----
    let mut op_reg = ModuleRegistry::new("operator");
    let mut str_reg = ModuleRegistry::new("str");
    let prims = PrimTypes {
        i32: &i32_ty,
        i8: &i8_ty,
        f64: &f64_ty,
        bool: &bool_ty,
        str: &str_ty,
        object: &object,
        exception: &exception,
        none: &none_ty,
    };
    let funcs = operators::register_operator_funcs(&mut op_reg, &mut str_reg, &prims);
    let ops = dispatch::register_operators(&mut op_reg, &oparg_ty, &opimpl_ty);

    // exception comparison: same type compares by message, different types
    // fall back to identity (always false) through the EQ fallback chain
    let exc_eq = pure_builtin(
        &mut op_reg,
        "exc_eq",
        vec![
            FuncParam::simple("a", exception.clone()),
            FuncParam::simple("b", exception.clone()),
        ],
        bool_ty.clone(),
        |_vm, args| match (&args[0], &args[1]) {
            (Value::Exception(a), Value::Exception(b)) => {
                Ok(Value::Bool(a.ty == b.ty && a.message == b.message))
            }
            _ => Ok(Value::Bool(false)),
        },
    );
    let exc_ne = pure_builtin(
        &mut op_reg,
        "exc_ne",
        vec![
            FuncParam::simple("a", exception.clone()),
            FuncParam::simple("b", exception.clone()),
        ],
        bool_ty.clone(),
        |_vm, args| match (&args[0], &args[1]) {
            (Value::Exception(a), Value::Exception(b)) => {
                Ok(Value::Bool(!(a.ty == b.ty && a.message == b.message)))
            }
            _ => Ok(Value::Bool(true)),
        },
    );

    // ---- multimethod table ----
    let mut mm = MultiMethodTable::new();
    {
        let t = &mut mm;
        // i32
        t.register("+", &i32_ty, &i32_ty, &funcs.i32_add);
        t.register("-", &i32_ty, &i32_ty, &funcs.i32_sub);
        t.register("*", &i32_ty, &i32_ty, &funcs.i32_mul);
        t.register("/", &i32_ty, &i32_ty, &funcs.i32_div);
        t.register("//", &i32_ty, &i32_ty, &funcs.i32_floordiv);
        t.register("%", &i32_ty, &i32_ty, &funcs.i32_mod);
        t.register("==", &i32_ty, &i32_ty, &funcs.i32_eq);
        t.register("!=", &i32_ty, &i32_ty, &funcs.i32_ne);
        t.register("<", &i32_ty, &i32_ty, &funcs.i32_lt);
        t.register("<=", &i32_ty, &i32_ty, &funcs.i32_le);
        t.register(">", &i32_ty, &i32_ty, &funcs.i32_gt);
        t.register(">=", &i32_ty, &i32_ty, &funcs.i32_ge);
        // f64
        t.register("+", &f64_ty, &f64_ty, &funcs.f64_add);
        t.register("-", &f64_ty, &f64_ty, &funcs.f64_sub);
        t.register("*", &f64_ty, &f64_ty, &funcs.f64_mul);
        t.register("/", &f64_ty, &f64_ty, &funcs.f64_div);
        t.register("//", &f64_ty, &f64_ty, &funcs.f64_floordiv);
        t.register("%", &f64_ty, &f64_ty, &funcs.f64_mod);
        t.register("==", &f64_ty, &f64_ty, &funcs.f64_eq);
        t.register("!=", &f64_ty, &f64_ty, &funcs.f64_ne);
        t.register("<", &f64_ty, &f64_ty, &funcs.f64_lt);
        t.register("<=", &f64_ty, &f64_ty, &funcs.f64_le);
        t.register(">", &f64_ty, &f64_ty, &funcs.f64_gt);
        t.register(">=", &f64_ty, &f64_ty, &funcs.f64_ge);
        // mixed i32/f64: the f64 impl wins, the typechecker inserts the
        // i32 -> f64 converter on the narrower side
        for (l, r) in [(&f64_ty, &i32_ty), (&i32_ty, &f64_ty)] {
            t.register("+", l, r, &funcs.f64_add);
            t.register("-", l, r, &funcs.f64_sub);
            t.register("*", l, r, &funcs.f64_mul);
            t.register("/", l, r, &funcs.f64_div);
            t.register("//", l, r, &funcs.f64_floordiv);
            t.register("%", l, r, &funcs.f64_mod);
            t.register("==", l, r, &funcs.f64_eq);
            t.register("!=", l, r, &funcs.f64_ne);
            t.register("<", l, r, &funcs.f64_lt);
            t.register("<=", l, r, &funcs.f64_le);
            t.register(">", l, r, &funcs.f64_gt);
            t.register(">=", l, r, &funcs.f64_ge);
        }
        // str
        t.register("+", &str_ty, &str_ty, &funcs.str_add);
        t.register("*", &str_ty, &i32_ty, &funcs.str_mul);
        t.register("==", &str_ty, &str_ty, &funcs.str_eq);
        t.register("!=", &str_ty, &str_ty, &funcs.str_ne);
        // bool
        t.register("==", &bool_ty, &bool_ty, &funcs.bool_eq);
        t.register("!=", &bool_ty, &bool_ty, &funcs.bool_ne);
        // unary
        t.register_unary("neg", &i32_ty, &funcs.i32_neg);
        t.register_unary("neg", &f64_ty, &funcs.f64_neg);
        t.register_unary("not", &bool_ty, &funcs.bool_not);
        // str conversion (`str` operands need no conversion at all)
        t.register_unary("str", &i32_ty, &funcs.i32_to_str);
        t.register_unary("str", &f64_ty, &funcs.f64_to_str);
        t.register_unary("str", &bool_ty, &funcs.bool_to_str);
        // implicit conversions; f64 -> i32 is deliberately absent (no
        // implicit truncation)
        t.register("convert", &i32_ty, &f64_ty, &funcs.i32_to_f64);
        t.register("convert", &i8_ty, &i32_ty, &funcs.i8_to_i32);
        t.register("convert", &i32_ty, &i8_ty, &funcs.i32_to_i8);
    }

    // ---- the `builtins` module ----
    let mut b_reg = ModuleRegistry::new("builtins");

    // exception hierarchy
    let exc_eq_meta = metafunc(
        Fqn::parse("builtins::Exception.__EQ__"),
        &oparg_ty,
        &opspec_ty,
        {
            let exc_eq = exc_eq.clone();
            move |_vm, args| {
                if args[0].static_ty == args[1].static_ty {
                    Ok(OpSpec::simple(exc_eq.clone()))
                } else {
                    Ok(OpSpec::Null)
                }
            }
        },
    );
    let exc_ne_meta = metafunc(
        Fqn::parse("builtins::Exception.__NE__"),
        &oparg_ty,
        &opspec_ty,
        {
            let exc_ne = exc_ne.clone();
            move |_vm, args| {
                if args[0].static_ty == args[1].static_ty {
                    Ok(OpSpec::simple(exc_ne.clone()))
                } else {
                    Ok(OpSpec::Null)
                }
            }
        },
    );
    for (ty, base) in [
        (&exception, &object),
        (&static_error, &exception),
        (&type_error, &static_error),
        (&value_error, &exception),
        (&index_error, &exception),
    ] {
        let mut body = TyBody {
            base: Some(base.clone()),
            ..TyBody::default()
        };
        body.dict.insert(
            "__new__".to_string(),
            Value::Func(exception_new(&mut b_reg, ty, &str_ty)),
        );
        body.dict
            .insert("__EQ__".to_string(), Value::Func(exc_eq_meta.clone()));
        body.dict
            .insert("__NE__".to_string(), Value::Func(exc_ne_meta.clone()));
        ty.define(body);
    }

    // str: subscription and length live in the capability table
    str_ty.define(TyBody {
        base: Some(object.clone()),
        size: Some(8),
        dict: [
            ("__getitem__".to_string(), Value::Func(funcs.str_getitem.clone())),
            ("__len__".to_string(), Value::Func(funcs.str_len.clone())),
            ("__hash__".to_string(), Value::Func(funcs.str_hash.clone())),
        ]
        .into_iter()
        .collect(),
        ..TyBody::default()
    });

    // range and its iterator, the canonical iterable. These stay red even
    // for known bounds: the iterator protocol always survives into residual
    // code as ordinary calls.
    let range_new = effect_builtin(
        &mut b_reg,
        "range.__new__",
        vec![FuncParam::simple("stop", i32_ty.clone())],
        range_ty.clone(),
        {
            let range_ty = range_ty.clone();
            move |_vm, args| {
                let stop = args[0].as_i32().unwrap_or(0);
                Ok(Value::Struct(Arc::new(WStruct {
                    ty: range_ty.clone(),
                    fields: vec![
                        ("start".to_string(), Value::I32(0)),
                        ("stop".to_string(), Value::I32(stop)),
                    ],
                })))
            }
        },
    );
    let range_iter = effect_builtin(
        &mut b_reg,
        "range.__iter__",
        vec![FuncParam::simple("r", range_ty.clone())],
        range_iter_ty.clone(),
        {
            let range_iter_ty = range_iter_ty.clone();
            move |_vm, args| match &args[0] {
                Value::Struct(r) => Ok(Value::Struct(Arc::new(WStruct {
                    ty: range_iter_ty.clone(),
                    fields: vec![
                        ("i".to_string(), r.field("start").cloned().unwrap_or(Value::I32(0))),
                        ("stop".to_string(), r.field("stop").cloned().unwrap_or(Value::I32(0))),
                    ],
                }))),
                other => Err(Error::spy(
                    ErrorKind::Type,
                    format!("range.__iter__ applied to {}", other),
                )),
            }
        },
    );
    let iter_continue = effect_builtin(
        &mut b_reg,
        "RangeIter.__continue_iteration__",
        vec![FuncParam::simple("it", range_iter_ty.clone())],
        bool_ty.clone(),
        |_vm, args| match &args[0] {
            Value::Struct(it) => {
                let i = it.field("i").and_then(Value::as_i32).unwrap_or(0);
                let stop = it.field("stop").and_then(Value::as_i32).unwrap_or(0);
                Ok(Value::Bool(i < stop))
            }
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("__continue_iteration__ applied to {}", other),
            )),
        },
    );
    let iter_item = effect_builtin(
        &mut b_reg,
        "RangeIter.__item__",
        vec![FuncParam::simple("it", range_iter_ty.clone())],
        i32_ty.clone(),
        |_vm, args| match &args[0] {
            Value::Struct(it) => Ok(it.field("i").cloned().unwrap_or(Value::I32(0))),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("__item__ applied to {}", other),
            )),
        },
    );
    let iter_next = effect_builtin(
        &mut b_reg,
        "RangeIter.__next__",
        vec![FuncParam::simple("it", range_iter_ty.clone())],
        range_iter_ty.clone(),
        {
            let range_iter_ty = range_iter_ty.clone();
            move |_vm, args| match &args[0] {
                Value::Struct(it) => {
                    let i = it.field("i").and_then(Value::as_i32).unwrap_or(0);
                    let stop = it.field("stop").cloned().unwrap_or(Value::I32(0));
                    Ok(Value::Struct(Arc::new(WStruct {
                        ty: range_iter_ty.clone(),
                        fields: vec![
                            ("i".to_string(), Value::I32(i.wrapping_add(1))),
                            ("stop".to_string(), stop),
                        ],
                    })))
                }
                other => Err(Error::spy(
                    ErrorKind::Type,
                    format!("__next__ applied to {}", other),
                )),
            }
        },
    );
    range_ty.define(TyBody {
        base: Some(object.clone()),
        size: Some(8),
        dict: [
            ("__new__".to_string(), Value::Func(range_new)),
            ("__iter__".to_string(), Value::Func(range_iter)),
        ]
        .into_iter()
        .collect(),
        fields: vec![
            StructField {
                name: "start".to_string(),
                ty: i32_ty.clone(),
                offset: 0,
            },
            StructField {
                name: "stop".to_string(),
                ty: i32_ty.clone(),
                offset: 4,
            },
        ],
        ..TyBody::default()
    });
    range_iter_ty.define(TyBody {
        base: Some(object.clone()),
        size: Some(8),
        dict: [
            ("__continue_iteration__".to_string(), Value::Func(iter_continue)),
            ("__item__".to_string(), Value::Func(iter_item)),
            ("__next__".to_string(), Value::Func(iter_next)),
        ]
        .into_iter()
        .collect(),
        fields: vec![
            StructField {
                name: "i".to_string(),
                ty: i32_ty.clone(),
                offset: 0,
            },
            StructField {
                name: "stop".to_string(),
                ty: i32_ty.clone(),
                offset: 4,
            },
        ],
        ..TyBody::default()
    });

    // `list` is a generic type: `list[T]` instantiates (and memoizes) a
    // concrete list type
    let class_getitem = metafunc(
        Fqn::parse("builtins::list.__CLASS_GETITEM__"),
        &oparg_ty,
        &opspec_ty,
        move |vm, args| {
            let item_ty = args[1].blue_type()?;
            let list_ty = vm.make_list_type(&item_ty);
            Ok(OpSpec::const_(Value::Type(list_ty)))
        },
    );
    list_base.define(TyBody {
        base: Some(object.clone()),
        dict: [("__CLASS_GETITEM__".to_string(), Value::Func(class_getitem))]
            .into_iter()
            .collect(),
        ..TyBody::default()
    });

    // print: one metafunction, one concrete function per printable type
    fn print_fn(reg: &mut ModuleRegistry, name: &str, ty: &Ty, none_ty: &Ty) -> Arc<WFunc> {
        effect_builtin(
            reg,
            name,
            vec![FuncParam::simple("x", ty.clone())],
            none_ty.clone(),
            |vm, args| {
                let line = args[0].to_string();
                vm.stdout.push(line);
                Ok(Value::None)
            },
        )
    }
    let print_str = print_fn(&mut b_reg, "print_str", &str_ty, &none_ty);
    let print_i32 = print_fn(&mut b_reg, "print_i32", &i32_ty, &none_ty);
    let print_f64 = print_fn(&mut b_reg, "print_f64", &f64_ty, &none_ty);
    let print_bool = print_fn(&mut b_reg, "print_bool", &bool_ty, &none_ty);
    let print_none = print_fn(&mut b_reg, "print_none", &none_ty, &none_ty);

    let print_meta = metafunc(Fqn::parse("builtins::print"), &oparg_ty, &opspec_ty, {
        let table = [
            (str_ty.clone(), print_str.clone()),
            (i32_ty.clone(), print_i32.clone()),
            (f64_ty.clone(), print_f64.clone()),
            (bool_ty.clone(), print_bool.clone()),
            (none_ty.clone(), print_none.clone()),
        ];
        move |_vm: &mut Vm, args: &[OpArg]| {
            let Some(first) = args.first() else {
                return Ok(OpSpec::Null);
            };
            for (prim, func) in &table {
                if &first.static_ty == prim {
                    return Ok(OpSpec::complex(func.clone(), vec![first.clone()]));
                }
            }
            Ok(OpSpec::Null)
        }
    });
    b_reg.add("print", Value::Func(print_meta));

    let len_meta = metafunc(Fqn::parse("builtins::len"), &oparg_ty, &opspec_ty, {
        move |_vm: &mut Vm, args: &[OpArg]| {
            let Some(first) = args.first() else {
                return Ok(OpSpec::Null);
            };
            match first.static_ty.lookup_func("__len__") {
                Some(func) => Ok(OpSpec::complex(func, vec![first.clone()])),
                None => Ok(OpSpec::Null),
            }
        }
    });
    b_reg.add("len", Value::Func(len_meta));

    // expose the types themselves
    for ty in [
        &object, &type_ty, &module_ty, &none_ty, &i32_ty, &i8_ty, &f64_ty, &bool_ty, &str_ty,
        &tuple_ty, &exception, &static_error, &type_error, &value_error, &index_error, &range_ty,
        &list_base,
    ] {
        let attr = ty.fqn().attr.clone();
        b_reg.add(&attr, Value::Type(ty.clone()));
    }

    // ---- the `unsafe` module ----
    let (unsafe_reg, gc_alloc) = unsafe_mod::register(&type_ty, &object);
    // surfaced in builtins so that sources can use it without imports
    b_reg.add_alias("gc_alloc", Value::Func(gc_alloc));

    let builtins = Builtins {
        object,
        type_ty,
        module_ty,
        none_ty,
        i32: i32_ty,
        i8: i8_ty,
        f64: f64_ty,
        bool: bool_ty,
        str: str_ty,
        tuple_ty,
        exception,
        static_error,
        type_error,
        value_error,
        index_error,
        oparg_ty,
        opspec_ty,
        opimpl_ty,
        range_ty,
        range_iter_ty,
        list_base,
        mm,
        funcs,
        ops,
        print_str,
        print_i32,
        print_f64,
        print_bool,
        print_none,
    };
    (builtins, vec![b_reg, op_reg, str_reg, unsafe_reg])
}
