//! Redshift behavior: residual ASTs are monomorphic, all-red, and reference
//! every call target by FQN.

mod common;

use common::*;

use pretty_assertions::assert_eq;

use spy_core::ast::{BinOpKind, ClassKind, CmpOpKind, Expr, FuncKind, Stmt};
use spy_core::error::{ErrorKind, Level};
use spy_core::fqn::Fqn;
use spy_vm::doppler::ErrorMode;
use spy_vm::value::Value;
use spy_vm::Vm;

fn hello_module() -> Vec<Stmt> {
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
    )]
}

#[test]
fn hello_world_residual_is_one_print_str_call() {
    let mut vm = Vm::new();
    load(&mut vm, hello_module());
    vm.redshift_all(ErrorMode::Eager).unwrap();

    let body = residual_body(&vm, "test::main");
    assert_eq!(body.len(), 1);
    let targets = stmt_call_targets(&body);
    assert_eq!(targets, vec!["builtins::print_str".to_string()]);

    // the residual form behaves exactly like the original
    call(&mut vm, "test::main", &[]);
    assert_eq!(vm.stdout, vec!["Hello world!".to_string()]);
}

#[test]
fn arithmetic_residual_pins_operator_fqns() {
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
    vm.redshift_all(ErrorMode::Eager).unwrap();

    let body = residual_body(&vm, "test::add");
    let targets = stmt_call_targets(&body);
    assert_eq!(
        targets,
        vec!["operator::i32_add".to_string(), "operator::i32_mul".to_string()]
    );

    // and still computes the same value
    let result = call(&mut vm, "test::add", &[Value::I32(3), Value::I32(4)]);
    assert_eq!(result.as_i32(), Some(11));
}

#[test]
fn blue_subtrees_fold_into_constants() {
    // def f(x: i32) -> i32: return x + (2 + 3)
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32")],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::name(sp(), "x"),
                    Expr::binop(sp(), BinOpKind::Add, Expr::i32(sp(), 2), Expr::i32(sp(), 3)),
                ),
            )],
        )],
    );
    vm.redshift_all(ErrorMode::Eager).unwrap();

    let body = residual_body(&vm, "test::f");
    let Stmt::Return(ret) = &body[0] else {
        panic!("expected a return")
    };
    let Expr::Call(call_node) = &ret.value else {
        panic!("expected a call, got {:?}", ret.value)
    };
    // the inner 2 + 3 has been folded to the literal 5
    match &call_node.args[1] {
        Expr::Const(c) => assert_eq!(c.value, spy_core::ast::Lit::I32(5)),
        other => panic!("expected a folded constant, got {:?}", other),
    }
}

#[test]
fn blue_if_picks_its_branch_at_shift_time() {
    // debug = False  (module const)
    // def f(x: i32) -> i32:
    //     if debug: return 0 - x
    //     else: return x
    let mut vm = Vm::new();
    let body = vec![
        Stmt::assign(sp(), "debug", Expr::bool(sp(), false)),
        red_func(
            "f",
            vec![arg("x", "i32")],
            "i32",
            vec![Stmt::If(spy_core::ast::If {
                span: sp(),
                test: Expr::name(sp(), "debug"),
                then_body: vec![Stmt::ret(
                    sp(),
                    Expr::binop(sp(), BinOpKind::Sub, Expr::i32(sp(), 0), Expr::name(sp(), "x")),
                )],
                else_body: vec![Stmt::ret(sp(), Expr::name(sp(), "x"))],
            })],
        ),
    ];
    load(&mut vm, body);
    vm.redshift_all(ErrorMode::Eager).unwrap();

    let body = residual_body(&vm, "test::f");
    // no residual `if` remains: the else branch was inlined
    assert_eq!(body.len(), 1);
    match &body[0] {
        Stmt::Return(ret) => match &ret.value {
            Expr::Name(name) => assert_eq!(name.id, "x"),
            other => panic!("expected `return x`, got {:?}", other),
        },
        other => panic!("expected a return, got {:?}", other),
    }
}

#[test]
fn red_if_keeps_both_branches() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32")],
            "i32",
            vec![
                Stmt::If(spy_core::ast::If {
                    span: sp(),
                    test: Expr::compare(sp(), CmpOpKind::Gt, Expr::name(sp(), "x"), Expr::i32(sp(), 0)),
                    then_body: vec![Stmt::ret(sp(), Expr::i32(sp(), 1))],
                    else_body: vec![],
                }),
                Stmt::ret(sp(), Expr::i32(sp(), 0)),
            ],
        )],
    );
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let body = residual_body(&vm, "test::f");
    assert_eq!(body.len(), 2);
    match &body[0] {
        Stmt::If(node) => {
            assert_eq!(node.then_body.len(), 1);
            assert!(node.else_body.is_empty());
            // the test itself is a resolved comparison call
            let mut targets = Vec::new();
            collect_call_targets(&node.test, &mut targets);
            assert_eq!(targets, vec!["operator::i32_gt".to_string()]);
        }
        other => panic!("expected a residual if, got {:?}", other),
    }
}

#[test]
fn string_residual_uses_the_runtime_entry_points() {
    // def greet(name: str, n: i32) -> str: return "hi " + name * n
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
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let targets = stmt_call_targets(&residual_body(&vm, "test::greet"));
    assert_eq!(targets, vec!["str::add".to_string(), "str::mul".to_string()]);
}

#[test]
fn redshift_is_idempotent() {
    let mut vm = Vm::new();
    load(&mut vm, hello_module());
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let first = residual_body(&vm, "test::main");
    // a second pass over the residual program changes nothing
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let second = residual_body(&vm, "test::main");
    assert_eq!(first, second);
}

#[test]
fn redshift_is_deterministic_across_vms() {
    let make = |vm: &mut Vm| {
        load(
            vm,
            vec![red_func(
                "f",
                vec![arg("x", "i32")],
                "f64",
                vec![Stmt::ret(
                    sp(),
                    Expr::binop(
                        sp(),
                        BinOpKind::Div,
                        Expr::name(sp(), "x"),
                        Expr::i32(sp(), 2),
                    ),
                )],
            )],
        );
        vm.redshift_all(ErrorMode::Eager).unwrap();
        residual_body(vm, "test::f")
    };
    let a = make(&mut Vm::new());
    let b = make(&mut Vm::new());
    assert_eq!(a, b);
}

#[test]
fn dispatch_is_deterministic_for_fixed_types() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32"), arg("y", "i32")],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::binop(
                    sp(),
                    BinOpKind::Add,
                    Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "x"), Expr::name(sp(), "y")),
                    Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "y"), Expr::name(sp(), "x")),
                ),
            )],
        )],
    );
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let targets = stmt_call_targets(&residual_body(&vm, "test::f"));
    assert_eq!(targets.len(), 3);
    assert!(targets.iter().all(|t| t == "operator::i32_add"));
}

#[test]
fn generic_instantiation_is_memoized() {
    // @blue.generic
    // def make_fn(T: type) -> object:
    //     def fn(x: T, y: T) -> T: return x + y * 2
    //     return fn
    // fn_f = make_fn(f64)
    // fn_f2 = make_fn(f64)
    let inner = funcdef(
        "fn",
        spy_core::ast::Color::Red,
        FuncKind::Plain,
        vec![arg("x", "T"), arg("y", "T")],
        Expr::name(sp(), "T"),
        vec![Stmt::ret(
            sp(),
            Expr::binop(
                sp(),
                BinOpKind::Add,
                Expr::name(sp(), "x"),
                Expr::binop(sp(), BinOpKind::Mul, Expr::name(sp(), "y"), Expr::i32(sp(), 2)),
            ),
        )],
    );
    let make_fn = generic_func(
        "make_fn",
        vec![arg("T", "type")],
        "object",
        vec![
            Stmt::FuncDef(inner),
            Stmt::ret(sp(), Expr::name(sp(), "fn")),
        ],
    );
    let mut vm = Vm::new();
    let body = vec![
        make_fn,
        Stmt::assign(
            sp(),
            "fn_f",
            Expr::call(sp(), Expr::name(sp(), "make_fn"), vec![Expr::name(sp(), "f64")]),
        ),
        Stmt::assign(
            sp(),
            "fn_f2",
            Expr::call(sp(), Expr::name(sp(), "make_fn"), vec![Expr::name(sp(), "f64")]),
        ),
    ];
    let wmod = load(&mut vm, body);

    // both calls returned the *same* cached function value
    let fn_f = wmod.getattr_maybe("fn_f").unwrap();
    let fn_f2 = wmod.getattr_maybe("fn_f2").unwrap();
    let (Value::Func(a), Value::Func(b)) = (&fn_f, &fn_f2) else {
        panic!("make_fn did not return functions")
    };
    assert_eq!(a.fqn, b.fqn);
    assert!(std::sync::Arc::ptr_eq(a, b));
    // the instance namespace records the type argument
    assert!(a.fqn.to_string().contains("make_fn[f64]"), "{}", a.fqn);

    // calling the instance works and monomorphizes to f64
    let result = vm
        .fast_call(a, &[Value::F64(1.0), Value::F64(2.0)])
        .unwrap();
    assert_eq!(result.as_f64(), Some(5.0));

    vm.redshift_all(ErrorMode::Eager).unwrap();
    let targets = stmt_call_targets(&residual_body(&vm, &a.fqn.to_string()));
    assert_eq!(
        targets,
        vec!["operator::f64_add".to_string(), "operator::f64_mul".to_string()]
    );
}

#[test]
fn nested_blue_error_reports_the_call_chain() {
    // @blue.generic def array(T: type, n: i32) -> type:
    //     if n < 1: raise StaticError("Array: N must be positive")
    //     return T
    // @blue.generic def matrix(T: type, r: i32, c: i32) -> type:
    //     return array[T, r - c]
    // def main() -> NoneType:
    //     m = matrix[i32, 2, 3]
    let array = generic_func(
        "array",
        vec![arg("T", "type"), arg("n", "i32")],
        "type",
        vec![
            Stmt::If(spy_core::ast::If {
                span: sp(),
                test: Expr::compare(sp(), CmpOpKind::Lt, Expr::name(sp(), "n"), Expr::i32(sp(), 1)),
                then_body: vec![Stmt::Raise(spy_core::ast::Raise {
                    span: sp(),
                    exc: Expr::call(
                        sp(),
                        Expr::name(sp(), "StaticError"),
                        vec![Expr::str(sp(), "Array: N must be positive")],
                    ),
                })],
                else_body: vec![],
            }),
            Stmt::ret(sp(), Expr::name(sp(), "T")),
        ],
    );
    let matrix = generic_func(
        "matrix",
        vec![arg("T", "type"), arg("r", "i32"), arg("c", "i32")],
        "type",
        vec![Stmt::ret(
            sp(),
            Expr::getitem(
                sp(),
                Expr::name(sp(), "array"),
                vec![
                    Expr::name(sp(), "T"),
                    Expr::binop(sp(), BinOpKind::Sub, Expr::name(sp(), "r"), Expr::name(sp(), "c")),
                ],
            ),
        )],
    );
    let main = red_func(
        "main",
        vec![],
        "NoneType",
        vec![Stmt::assign(
            sp(),
            "m",
            Expr::getitem(
                sp(),
                Expr::name(sp(), "matrix"),
                vec![Expr::name(sp(), "i32"), Expr::i32(sp(), 2), Expr::i32(sp(), 3)],
            ),
        )],
    );

    let mut vm = Vm::new();
    load(&mut vm, vec![array, matrix, main]);
    let err = vm.redshift_all(ErrorMode::Eager).unwrap_err();
    let spy = err.as_spy().expect("expected a structured error");
    assert_eq!(spy.kind, ErrorKind::Static);
    assert!(spy.message.contains("N must be positive"), "{}", spy.message);
    // the blue call chain is annotated: the raise site plus one note per
    // nested call, inner first
    let notes: Vec<&str> = spy
        .annotations
        .iter()
        .filter(|ann| ann.level == Level::Note)
        .map(|ann| ann.message.as_str())
        .collect();
    assert!(
        notes.iter().any(|n| n.contains("GETITEM")),
        "missing call-site notes: {:?}",
        notes
    );
    assert!(spy.annotations.len() >= 3, "{:?}", spy.annotations);
}

#[test]
fn lazy_mode_defers_static_errors_to_runtime_raises() {
    // def f(x: i32) -> i32:
    //     y = x + "nope"        # a static TypeError
    //     return x
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32")],
            "i32",
            vec![
                Stmt::assign(
                    sp(),
                    "y",
                    Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "x"), Expr::str(sp(), "nope")),
                ),
                Stmt::ret(sp(), Expr::name(sp(), "x")),
            ],
        )],
    );
    vm.redshift_all(ErrorMode::Lazy).unwrap();
    assert_eq!(vm.warnings.len(), 1);

    let body = residual_body(&vm, "test::f");
    // the offending statement became a raise of a prebuilt exception
    assert!(
        matches!(&body[0], Stmt::Raise(raise) if matches!(&raise.exc, Expr::FqnConst(_))),
        "expected a residual raise, got {:?}",
        body[0]
    );
}

#[test]
fn eager_mode_aborts_on_static_errors() {
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![red_func(
            "f",
            vec![arg("x", "i32")],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::binop(sp(), BinOpKind::Add, Expr::name(sp(), "x"), Expr::str(sp(), "nope")),
            )],
        )],
    );
    let err = vm.redshift_all(ErrorMode::Eager).unwrap_err();
    assert!(err.matches(ErrorKind::Type), "{}", err);
}

#[test]
fn interp_and_redshift_agree_on_outputs_and_effects() {
    // def f(n: i32) -> i32:
    //     total = 0
    //     for i in range(n):
    //         print(total)
    //         total = total + i
    //     return total
    let build = || {
        vec![red_func(
            "f",
            vec![arg("n", "i32")],
            "i32",
            vec![
                Stmt::assign(sp(), "total", Expr::i32(sp(), 0)),
                Stmt::For(spy_core::ast::For {
                    span: sp(),
                    target_span: sp(),
                    target: "i".to_string(),
                    iter: Expr::call(sp(), Expr::name(sp(), "range"), vec![Expr::name(sp(), "n")]),
                    body: vec![
                        Stmt::expr(
                            sp(),
                            Expr::call(
                                sp(),
                                Expr::name(sp(), "print"),
                                vec![Expr::name(sp(), "total")],
                            ),
                        ),
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
                    seq: 0,
                }),
                Stmt::ret(sp(), Expr::name(sp(), "total")),
            ],
        )]
    };

    // plain interpretation
    let mut vm1 = Vm::new();
    load(&mut vm1, build());
    let r1 = call(&mut vm1, "test::f", &[Value::I32(4)]);

    // redshift first, then run the residual form
    let mut vm2 = Vm::new();
    load(&mut vm2, build());
    vm2.redshift_all(ErrorMode::Eager).unwrap();
    let r2 = call(&mut vm2, "test::f", &[Value::I32(4)]);

    assert_eq!(r1.as_i32(), r2.as_i32());
    assert_eq!(vm1.stdout, vm2.stdout);
}

#[test]
fn fqns_stay_unique_per_vm() {
    let mut vm = Vm::new();
    // two distinct inner functions with the same name get distinct FQNs
    let mk = |outer: &str| {
        blue_func(
            outer,
            vec![],
            "object",
            vec![
                Stmt::FuncDef(funcdef(
                    "inner",
                    spy_core::ast::Color::Red,
                    FuncKind::Plain,
                    vec![],
                    Expr::name(sp(), "i32"),
                    vec![Stmt::ret(sp(), Expr::i32(sp(), 1))],
                )),
                Stmt::ret(sp(), Expr::name(sp(), "inner")),
            ],
        )
    };
    let body = vec![
        mk("a"),
        mk("b"),
        Stmt::assign(sp(), "fa", Expr::call(sp(), Expr::name(sp(), "a"), vec![])),
        Stmt::assign(sp(), "fb", Expr::call(sp(), Expr::name(sp(), "b"), vec![])),
    ];
    let wmod = load(&mut vm, body);
    let (Some(Value::Func(fa)), Some(Value::Func(fb))) =
        (wmod.getattr_maybe("fa"), wmod.getattr_maybe("fb"))
    else {
        panic!("expected function values")
    };
    assert_ne!(fa.fqn, fb.fqn);
    assert!(vm.lookup_global(&fa.fqn).is_some());
    assert!(vm.lookup_global(&fb.fqn).is_some());
}

#[test]
fn residual_struct_access_goes_through_accessor_fqns() {
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
    load(
        &mut vm,
        vec![
            classdef,
            red_func(
                "getx",
                vec![arg("p", "Point")],
                "i32",
                vec![Stmt::ret(sp(), Expr::getattr(sp(), Expr::name(sp(), "p"), "x"))],
            ),
        ],
    );
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let targets = stmt_call_targets(&residual_body(&vm, "test::getx"));
    assert_eq!(targets, vec!["test.Point::__get_x__".to_string()]);
}

#[test]
fn residual_ast_serializes_for_the_emitter() {
    let mut vm = Vm::new();
    load(&mut vm, hello_module());
    vm.redshift_all(ErrorMode::Eager).unwrap();
    let body = residual_body(&vm, "test::main");
    let json = serde_json::to_string(&body).expect("residual AST must serialize");
    assert!(json.contains("print_str"), "{}", json);
}

#[test]
fn list_instantiation_returns_the_same_type() {
    let mut vm = Vm::new();
    let i32_ty = vm.builtins().i32.clone();
    let a = vm.make_list_type(&i32_ty);
    let b = vm.make_list_type(&i32_ty);
    assert_eq!(a, b);
    assert_eq!(a.fqn(), &Fqn::parse("builtins::list").with_qualifiers(vec![
        spy_core::fqn::Qualifier::value("i32"),
    ]));
}

#[test]
fn blue_recursion_on_the_same_key_is_a_cycle_error() {
    // @blue def f() -> i32: return f()
    let mut vm = Vm::new();
    load(
        &mut vm,
        vec![blue_func(
            "f",
            vec![],
            "i32",
            vec![Stmt::ret(
                sp(),
                Expr::call(sp(), Expr::name(sp(), "f"), vec![]),
            )],
        )],
    );
    let func = global_func(&vm, "test::f");
    let err = vm.fast_call(&func, &[]).unwrap_err();
    assert!(err.matches(ErrorKind::Static), "{}", err);
    assert!(err.to_string().contains("cycle"), "{}", err);
}
