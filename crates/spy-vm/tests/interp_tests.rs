//! Interp-mode behavior: the VM runs typed ASTs directly and produces
//! ordinary values and side effects.

mod common;

use common::*;

use pretty_assertions::assert_eq;

use spy_core::ast::{BinOpKind, BoolOpKind, ClassKind, CmpOpKind, Expr, Lit, Stmt};
use spy_core::error::ErrorKind;
use spy_vm::value::Value;
use spy_vm::Vm;

#[test]
fn hello_world_prints_one_line() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "main",
            vec![],
            "NoneType",
            vec![Stmt::expr(
                sp(),
                Expr::call(
                    sp(),
                    Expr::name(sp(), "print"),
                    vec![Expr::str(sp(), "Hello world!")],
                ),
            )],
        )],
    );
    call(&mut vm, "test::main", &[]);
    assert_eq!(vm.stdout, vec!["Hello world!".to_string()]);
}

#[test]
fn add_with_precedence() {
    // def add(x: i32, y: i32) -> i32: return x + y * 2
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "add",
            vec![arg("x", "i32"), arg("y", "i32")],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::name(sp(), "x"),
                    Expr::binop(
                        sp(),
                        BinOpKind::Mul,
                        Expr::name(sp(), "y"),
                        Expr::i32(sp(), 2),
                    ),
                ),
            )],
        )],
    );
    let result = call(&mut vm, "test::add", &[Value::I32(3), Value::I32(4)]);
    assert_eq!(result.as_i32(), Some(11));
}

#[test]
fn division_is_true_division() {
    // i32 / i32 yields f64; division by zero panics
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "div",
            vec![arg("a", "i32"), arg("b", "i32")],
            "f64",
            vec![Stmt::ret(
                sp(),
                Expr::binop(
                    sp(),
                    BinOpKind::Div,
                    Expr::name(sp(), "a"),
                    Expr::name(sp(), "b"),
                ),
            )],
        )],
    );
    let result = call(&mut vm, "test::div", &[Value::I32(7), Value::I32(2)]);
    assert_eq!(result.as_f64(), Some(3.5));

    let func = global_func(&vm, "test::div");
    let err = vm
        .fast_call(&func, &[Value::I32(7), Value::I32(0)])
        .unwrap_err();
    assert!(err.matches(ErrorKind::Panic), "{}", err);
}

#[test]
fn floor_div_and_mod_follow_divisor_sign() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![
            red_func(
                "fdiv",
                vec![arg("a", "i32"), arg("b", "i32")],
                "i32",
                vec![Stmt::ret(
                    sp(),
                    Expr::binop(
                        sp(),
                        BinOpKind::FloorDiv,
                        Expr::name(sp(), "a"),
                        Expr::name(sp(), "b"),
                    ),
                )],
            ),
            red_func(
                "imod",
                vec![arg("a", "i32"), arg("b", "i32")],
                "i32",
                vec![Stmt::ret(
                    sp(),
                    Expr::binop(
                        sp(),
                        BinOpKind::Mod,
                        Expr::name(sp(), "a"),
                        Expr::name(sp(), "b"),
                    ),
                )],
            ),
        ],
    );
    let q = call(&mut vm, "test::fdiv", &[Value::I32(-7), Value::I32(2)]);
    assert_eq!(q.as_i32(), Some(-4));
    let r = call(&mut vm, "test::imod", &[Value::I32(-7), Value::I32(2)]);
    assert_eq!(r.as_i32(), Some(1));
}

#[test]
fn while_loop_with_break_and_continue() {
    // def f() -> i32:
    //     total = 0
    //     i = 0
    //     while True:
    //         i = i + 1
    //         if i > 10: break
    //         if i % 2 == 0: continue
    //         total = total + i
    //     return total        # 1+3+5+7+9 = 25
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(sp(), "total", Expr::i32(sp(), 0)),
        Stmt::assign(sp(), "i", Expr::i32(sp(), 0)),
        Stmt::While(spy_core::ast::While {
            span: sp(),
            test: Expr::bool(sp(), true),
            body: vec![
                Stmt::assign(
                    sp(),
                    "i",
                    Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "i"), Expr::i32(sp(), 1)),
                ),
                Stmt::If(spy_core::ast::If {
                    span: sp(),
                    test: Expr::compare(
                        sp(),
                        CmpOpKind::Gt,
                        Expr::name(sp(), "i"),
                        Expr::i32(sp(), 10),
                    ),
                    then_body: vec![Stmt::Break(spy_core::ast::Break { span: sp() })],
                    else_body: vec![],
                }),
                Stmt::If(spy_core::ast::If {
                    span: sp(),
                    test: Expr::compare(
                        sp(),
                        CmpOpKind::Eq,
                        Expr::binop(sp(), BinOpKind::Mod, Expr::name(sp(), "i"), Expr::i32(sp(), 2)),
                        Expr::i32(sp(), 0),
                    ),
                    then_body: vec![Stmt::Continue(spy_core::ast::Continue { span: sp() })],
                    else_body: vec![],
                }),
                Stmt::assign(
                    sp(),
                    "total",
                    Expr::binop(
                        sp(),
                        BinOpKind::Add,
                        Expr::name(sp(), "total"),
                        Expr::name(sp(), "i"),
                    ),
                ),
            ],
        }),
        Stmt::ret(sp(), Expr::name(sp(), "total")),
    ];
    load(&mut vm, vec![red_func("f", vec![], "i32", body)]);
    let result = call(&mut vm, "test::f", &[]);
    assert_eq!(result.as_i32(), Some(25));
}

#[test]
fn for_loop_over_range() {
    // def f(n: i32) -> i32:
    //     total = 0
    //     for i in range(n): total = total + i
    //     return total
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(sp(), "total", Expr::i32(sp(), 0)),
        Stmt::For(spy_core::ast::For {
            span: sp(),
            target_span: sp(),
            target: "i".to_string(),
            iter: Expr::call(sp(), Expr::name(sp(), "range"), vec![Expr::name(sp(), "n")]),
            body: vec![Stmt::assign(
                sp(),
                "total",
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::name(sp(), "total"),
                    Expr::name(sp(), "i"),
                ),
            )],
            seq: 0,
        }),
        Stmt::ret(sp(), Expr::name(sp(), "total")),
    ];
    load(&mut vm, vec![red_func("f", vec![arg("n", "i32")], "i32", body)]);
    let result = call(&mut vm, "test::f", &[Value::I32(5)]);
    assert_eq!(result.as_i32(), Some(10));
}

#[test]
fn boolop_short_circuits() {
    // def f(x: i32) -> bool: return x > 0 and 10 % x == 0
    // f(0) must not divide by zero
    let mut vm = Vm::new();
    let body = vec![Stmt::ret(
        sp(),
        Expr::BoolOp(spy_core::ast::BoolOp {
            span: sp(),
            op: BoolOpKind::And,
            values: vec![
                Expr::compare(sp(), CmpOpKind::Gt, Expr::name(sp(), "x"), Expr::i32(sp(), 0)),
                Expr::compare(
                    sp(),
                    CmpOpKind::Eq,
                    Expr::binop(sp(), BinOpKind::Mod, Expr::i32(sp(), 10), Expr::name(sp(), "x")),
                    Expr::i32(sp(), 0),
                ),
            ],
        }),
    )];
    load(&mut vm, vec![red_func("f", vec![arg("x", "i32")], "bool", body)]);
    assert_eq!(call(&mut vm, "test::f", &[Value::I32(5)]).as_bool(), Some(true));
    assert_eq!(call(&mut vm, "test::f", &[Value::I32(3)]).as_bool(), Some(false));
    assert_eq!(call(&mut vm, "test::f", &[Value::I32(0)]).as_bool(), Some(false));
}

#[test]
fn string_concat_and_repeat() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "greet",
            vec![arg("name", "str"), arg("n", "i32")],
            "str",
            vec![Stmt::ret(
                sp(),
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::str(sp(), "hi "),
                    Expr::binop(
                        sp(),
                        BinOpKind::Mul,
                        Expr::name(sp(), "name"),
                        Expr::name(sp(), "n"),
                    ),
                ),
            )],
        )],
    );
    let result = call(&mut vm, "test::greet", &[Value::str("yo"), Value::I32(2)]);
    assert_eq!(result.as_str().map(|s| s.as_str()), Some("hi yoyo"));
    let result = call(&mut vm, "test::greet", &[Value::str("yo"), Value::I32(-1)]);
    assert_eq!(result.as_str().map(|s| s.as_str()), Some("hi "));
}

#[test]
fn fstring_interpolation() {
    // def f(x: i32) -> str: return f"x={x}!"
    let mut vm = Vm::new();
    let body = vec![Stmt::ret(
        sp(),
        Expr::FStr(spy_core::ast::FStr {
            span: sp(),
            parts: vec![
                spy_core::ast::FStrPart::Text("x=".to_string()),
                spy_core::ast::FStrPart::Expr(Expr::name(sp(), "x")),
                spy_core::ast::FStrPart::Text("!".to_string()),
            ],
        }),
    )];
    load(&mut vm, vec![red_func("f", vec![arg("x", "i32")], "str", body)]);
    let result = call(&mut vm, "test::f", &[Value::I32(42)]);
    assert_eq!(result.as_str().map(|s| s.as_str()), Some("x=42!"));
}

#[test]
fn mixed_arithmetic_promotes_to_f64() {
    // def f(x: i32) -> f64: return x + 0.5
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32")],
            "f64",
            vec![Stmt::ret(
                sp(),
                Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "x"), Expr::f64(sp(), 0.5)),
            )],
        )],
    );
    let result = call(&mut vm, "test::f", &[Value::I32(2)]);
    assert_eq!(result.as_f64(), Some(2.5));
}

#[test]
fn comparing_unrelated_types_is_a_type_error() {
    let mut vm = Vm::new();
    let err = vm
        .import_module(
            module(vec![red_func(
                "f",
                vec![arg("x", "i32"), arg("s", "str")],
                "bool",
                vec![Stmt::ret(
                    sp(),
                    Expr::compare(sp(), CmpOpKind::Eq, Expr::name(sp(), "x"), Expr::name(sp(), "s")),
                )],
            )]),
            "test",
        )
        .map(|_| ())
        .and_then(|_| {
            let func = global_func(&vm, "test::f");
            vm.fast_call(&func, &[Value::I32(1), Value::str("x")])
                .map(|_| ())
        })
        .unwrap_err();
    assert!(err.matches(ErrorKind::Type), "{}", err);
}

#[test]
fn struct_field_read_and_frozen_assignment() {
    // @struct class Point: x: i32; y: i32
    let mut vm = Vm::new();
    let classdef = Stmt::ClassDef(spy_core::ast::ClassDef {
        span: sp(),
        name: "Point".to_string(),
        kind: ClassKind::Struct,
        fields: vec![
            spy_core::ast::FieldDef {
                span: sp(),
                name: "x".to_string(),
                ty: Expr::name(sp(), "i32"),
            },
            spy_core::ast::FieldDef {
                span: sp(),
                name: "y".to_string(),
                ty: Expr::name(sp(), "i32"),
            },
        ],
        methods: vec![],
        scope: 0,
    });
    // def getx(p: Point) -> i32: return p.x
    let getx = red_func(
        "getx",
        vec![arg("p", "Point")],
        "i32",
        vec![Stmt::ret(sp(), Expr::getattr(sp(), Expr::name(sp(), "p"), "x"))],
    );
    // def setx(p: Point) -> NoneType: p.x = 3   (a static error)
    let setx = red_func(
        "setx",
        vec![arg("p", "Point")],
        "NoneType",
        vec![Stmt::SetAttr(spy_core::ast::SetAttr {
            span: sp(),
            target: Expr::name(sp(), "p"),
            attr: "x".to_string(),
            value: Expr::i32(sp(), 3),
        })],
    );
    load(&mut vm, vec![classdef, getx, setx]);

    // build a Point through its generated constructor
    let point = call(&mut vm, "test.Point::__make__", &[Value::I32(1), Value::I32(2)]);
    let result = call(&mut vm, "test::getx", &[point.clone()]);
    assert_eq!(result.as_i32(), Some(1));

    let func = global_func(&vm, "test::setx");
    let err = vm.fast_call(&func, &[point]).unwrap_err();
    assert!(err.matches(ErrorKind::Type), "{}", err);
    assert!(err.to_string().contains("does not support assignment"), "{}", err);
}

#[test]
fn gc_alloc_pointer_mutation() {
    // p = gc_alloc(Point)(1); p.x = 7; return p.x
    let mut vm = Vm::new();
    let classdef = Stmt::ClassDef(spy_core::ast::ClassDef {
        span: sp(),
        name: "Point".to_string(),
        kind: ClassKind::Struct,
        fields: vec![spy_core::ast::FieldDef {
            span: sp(),
            name: "x".to_string(),
            ty: Expr::name(sp(), "i32"),
        }],
        methods: vec![],
        scope: 0,
    });
    let body = vec![
        Stmt::assign(
            sp(),
            "p",
            Expr::call(
                sp(),
                Expr::call(sp(), Expr::name(sp(), "gc_alloc"), vec![Expr::name(sp(), "Point")]),
                vec![Expr::i32(sp(), 1)],
            ),
        ),
        Stmt::SetAttr(spy_core::ast::SetAttr {
            span: sp(),
            target: Expr::name(sp(), "p"),
            attr: "x".to_string(),
            value: Expr::i32(sp(), 7),
        }),
        Stmt::ret(sp(), Expr::getattr(sp(), Expr::name(sp(), "p"), "x")),
    ];
    load(&mut vm, vec![classdef, red_func("f", vec![], "i32", body)]);
    let result = call(&mut vm, "test::f", &[]);
    assert_eq!(result.as_i32(), Some(7));
}

#[test]
fn pointer_access_is_bounds_checked() {
    // p = gc_alloc(i32)(2); return p[5]  -> panic
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(
            sp(),
            "p",
            Expr::call(
                sp(),
                Expr::call(sp(), Expr::name(sp(), "gc_alloc"), vec![Expr::name(sp(), "i32")]),
                vec![Expr::i32(sp(), 2)],
            ),
        ),
        Stmt::ret(
            sp(),
            Expr::getitem(sp(), Expr::name(sp(), "p"), vec![Expr::i32(sp(), 5)]),
        ),
    ];
    load(&mut vm, vec![red_func("f", vec![], "i32", body)]);
    let func = global_func(&vm, "test::f");
    let err = vm.fast_call(&func, &[]).unwrap_err();
    assert!(err.matches(ErrorKind::Panic), "{}", err);
    assert!(err.to_string().contains("out of bounds"), "{}", err);
}

#[test]
fn exceptions_of_different_types_compare_unequal() {
    // return TypeError("a") == ValueError("a")  -> False, not an error
    let mut vm = Vm::new();
    let body = vec![Stmt::ret(
        sp(),
        Expr::compare(
            sp(),
            CmpOpKind::Eq,
            Expr::call(sp(), Expr::name(sp(), "TypeError"), vec![Expr::str(sp(), "a")]),
            Expr::call(sp(), Expr::name(sp(), "ValueError"), vec![Expr::str(sp(), "a")]),
        ),
    )];
    load(&mut vm, vec![red_func("f", vec![], "bool", body)]);
    let result = call(&mut vm, "test::f", &[]);
    assert_eq!(result.as_bool(), Some(false));
}

#[test]
fn exceptions_of_same_type_compare_by_message() {
    let mut vm = Vm::new();
    let body = vec![Stmt::ret(
        sp(),
        Expr::compare(
            sp(),
            CmpOpKind::Eq,
            Expr::call(sp(), Expr::name(sp(), "TypeError"), vec![Expr::str(sp(), "a")]),
            Expr::call(sp(), Expr::name(sp(), "TypeError"), vec![Expr::str(sp(), "a")]),
        ),
    )];
    load(&mut vm, vec![red_func("f", vec![], "bool", body)]);
    let result = call(&mut vm, "test::f", &[]);
    assert_eq!(result.as_bool(), Some(true));
}

#[test]
fn raise_aborts_with_the_exception_kind() {
    let mut vm = Vm::new();
    let body = vec![Stmt::Raise(spy_core::ast::Raise {
        span: sp(),
        exc: Expr::call(
            sp(),
            Expr::name(sp(), "ValueError"),
            vec![Expr::str(sp(), "boom")],
        ),
    })];
    load(&mut vm, vec![red_func("f", vec![], "NoneType", body)]);
    let func = global_func(&vm, "test::f");
    let err = vm.fast_call(&func, &[]).unwrap_err();
    assert!(err.matches(ErrorKind::Value), "{}", err);
    assert!(err.to_string().contains("boom"), "{}", err);
}

#[test]
fn assert_failure_carries_the_message() {
    let mut vm = Vm::new();
    let body = vec![Stmt::Assert(spy_core::ast::Assert {
        span: sp(),
        test: Expr::compare(sp(), CmpOpKind::Lt, Expr::name(sp(), "x"), Expr::i32(sp(), 0)),
        msg: Some(Expr::str(sp(), "x must be negative")),
    })];
    load(&mut vm, vec![red_func("f", vec![arg("x", "i32")], "NoneType", body)]);
    let func = global_func(&vm, "test::f");
    assert!(vm.fast_call(&func, &[Value::I32(-1)]).is_ok());
    let err = vm.fast_call(&func, &[Value::I32(1)]).unwrap_err();
    assert!(err.matches(ErrorKind::Assertion), "{}", err);
    assert!(err.to_string().contains("x must be negative"), "{}", err);
}

#[test]
fn missing_return_in_non_void_function() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func("f", vec![], "i32", vec![Stmt::Pass(spy_core::ast::Pass { span: sp() })])],
    );
    let func = global_func(&vm, "test::f");
    let err = vm.fast_call(&func, &[]).unwrap_err();
    assert!(err.matches(ErrorKind::Type), "{}", err);
    assert!(err.to_string().contains("without a `return`"), "{}", err);
}

#[test]
fn undefined_name_is_a_name_error() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![],
            "i32",
            vec![Stmt::ret(sp(), Expr::name(sp(), "nope"))],
        )],
    );
    let func = global_func(&vm, "test::f");
    let err = vm.fast_call(&func, &[]).unwrap_err();
    assert!(err.matches(ErrorKind::Name), "{}", err);
}

#[test]
fn module_level_var_is_shared_through_a_cell() {
    // var counter: i32 = 0
    // def bump() -> NoneType: counter = counter + 1
    // def get() -> i32: return counter
    let mut vm = Vm::new();
    let body = vec![
        Stmt::VarDef(spy_core::ast::VarDef {
            span: sp(),
            kind: Some(spy_core::ast::VarKind::Var),
            name: "counter".to_string(),
            ty: Expr::name(sp(), "i32"),
        }),
        Stmt::assign(sp(), "counter", Expr::i32(sp(), 0)),
        red_func(
            "bump",
            vec![],
            "NoneType",
            vec![Stmt::assign(
                sp(),
                "counter",
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::name(sp(), "counter"),
                    Expr::i32(sp(), 1),
                ),
            )],
        ),
        red_func(
            "get",
            vec![],
            "i32",
            vec![Stmt::ret(sp(), Expr::name(sp(), "counter"))],
        ),
    ];
    load(&mut vm, body);
    call(&mut vm, "test::bump", &[]);
    call(&mut vm, "test::bump", &[]);
    let result = call(&mut vm, "test::get", &[]);
    assert_eq!(result.as_i32(), Some(2));
}

#[test]
fn lists_are_typed_and_indexable() {
    // def f(i: i32) -> i32: xs = [10, 20, 30]; xs[1] = 21; return xs[i]
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(
            sp(),
            "xs",
            Expr::List(spy_core::ast::ListExpr {
                span: sp(),
                items: vec![Expr::i32(sp(), 10), Expr::i32(sp(), 20), Expr::i32(sp(), 30)],
            }),
        ),
        Stmt::SetItem(spy_core::ast::SetItem {
            span: sp(),
            target: Expr::name(sp(), "xs"),
            args: vec![Expr::i32(sp(), 1)],
            value: Expr::i32(sp(), 21),
        }),
        Stmt::ret(
            sp(),
            Expr::getitem(sp(), Expr::name(sp(), "xs"), vec![Expr::name(sp(), "i")]),
        ),
    ];
    load(&mut vm, vec![red_func("f", vec![arg("i", "i32")], "i32", body)]);
    assert_eq!(call(&mut vm, "test::f", &[Value::I32(1)]).as_i32(), Some(21));
    assert_eq!(call(&mut vm, "test::f", &[Value::I32(2)]).as_i32(), Some(30));
}

#[test]
fn typelift_wraps_and_unwraps() {
    // @typelift class Meters: __ll__: i32
    // def f(x: i32) -> i32: m = Meters.__lift__(x); return m.__unlift__()
    let mut vm = Vm::new();
    let classdef = Stmt::ClassDef(spy_core::ast::ClassDef {
        span: sp(),
        name: "Meters".to_string(),
        kind: ClassKind::Typelift,
        fields: vec![spy_core::ast::FieldDef {
            span: sp(),
            name: "__ll__".to_string(),
            ty: Expr::name(sp(), "i32"),
        }],
        methods: vec![],
        scope: 0,
    });
    let body = vec![
        Stmt::assign(
            sp(),
            "m",
            Expr::call_method(
                sp(),
                Expr::name(sp(), "Meters"),
                "__lift__",
                vec![Expr::name(sp(), "x")],
            ),
        ),
        Stmt::ret(
            sp(),
            Expr::call_method(sp(), Expr::name(sp(), "m"), "__unlift__", vec![]),
        ),
    ];
    load(
        &mut vm,
        vec![classdef, red_func("f", vec![arg("x", "i32")], "i32", body)],
    );
    let result = call(&mut vm, "test::f", &[Value::I32(42)]);
    assert_eq!(result.as_i32(), Some(42));
}

#[test]
fn len_of_string() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("s", "str")],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::call(sp(), Expr::name(sp(), "len"), vec![Expr::name(sp(), "s")]),
            )],
        )],
    );
    let result = call(&mut vm, "test::f", &[Value::str("hello")]);
    assert_eq!(result.as_i32(), Some(5));
}

#[test]
fn str_getitem_wraps_negative_indices() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("s", "str"), arg("i", "i32")],
            "str",
            vec![Stmt::ret(
                sp(),
                Expr::getitem(sp(), Expr::name(sp(), "s"), vec![Expr::name(sp(), "i")]),
            )],
        )],
    );
    let r = call(&mut vm, "test::f", &[Value::str("abc"), Value::I32(-1)]);
    assert_eq!(r.as_str().map(|s| s.as_str()), Some("c"));
    let func = global_func(&vm, "test::f");
    let err = vm
        .fast_call(&func, &[Value::str("abc"), Value::I32(3)])
        .unwrap_err();
    assert!(err.matches(ErrorKind::Panic), "{}", err);
}

#[test]
fn augassign_desugars_to_binop() {
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(sp(), "x", Expr::i32(sp(), 10)),
        Stmt::AugAssign(spy_core::ast::AugAssign {
            span: sp(),
            target_span: sp(),
            target: "x".to_string(),
            op: BinOpKind::Add,
            value: Expr::i32(sp(), 5),
        }),
        Stmt::ret(sp(), Expr::name(sp(), "x")),
    ];
    load(&mut vm, vec![red_func("f", vec![], "i32", body)]);
    assert_eq!(call(&mut vm, "test::f", &[]).as_i32(), Some(15));
}

#[test]
fn literal_kinds_evaluate_to_their_types() {
    let mut vm = Vm::new();
    let body = vec![Stmt::ret(
        sp(),
        Expr::Tuple(spy_core::ast::TupleExpr {
            span: sp(),
            items: vec![
                Expr::const_(sp(), Lit::Bool(true)),
                Expr::const_(sp(), Lit::I32(1)),
                Expr::const_(sp(), Lit::F64(1.5)),
                Expr::const_(sp(), Lit::None),
            ],
        }),
    )];
    load(&mut vm, vec![red_func("f", vec![], "tuple", body)]);
    match call(&mut vm, "test::f", &[]) {
        Value::Tuple(items) => {
            assert_eq!(items.len(), 4);
            assert_eq!(items[0].as_bool(), Some(true));
            assert_eq!(items[1].as_i32(), Some(1));
            assert_eq!(items[2].as_f64(), Some(1.5));
            assert!(items[3].is_none());
        }
        other => panic!("expected a tuple, got {}", other),
    }
}
