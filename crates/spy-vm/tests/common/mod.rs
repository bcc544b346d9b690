//! Shared helpers: build module ASTs by hand (the parser is external to this
//! workspace), load them into a VM and call functions by name.

#![allow(dead_code)]

use std::sync::Arc;

use spy_core::ast::{self, Color, Expr, FuncKind, Stmt};
use spy_core::fqn::Fqn;
use spy_core::span::Span;
use spy_vm::module::WModule;
use spy_vm::value::{Value, WFunc};
use spy_vm::Vm;

pub fn sp() -> Span {
    Span::fake()
}

pub fn arg(name: &str, ty: &str) -> ast::FuncArg {
    ast::FuncArg {
        span: sp(),
        name: name.to_string(),
        ty: Expr::name(sp(), ty),
    }
}

pub fn funcdef(
    name: &str,
    color: Color,
    kind: FuncKind,
    args: Vec<ast::FuncArg>,
    return_type: Expr,
    body: Vec<Stmt>,
) -> ast::FuncDef {
    ast::FuncDef {
        span: sp(),
        prototype_span: sp(),
        name: name.to_string(),
        color,
        kind,
        args,
        return_type: Box::new(return_type),
        body,
        decorators: vec![],
        scope: 0,
    }
}

pub fn red_func(name: &str, args: Vec<ast::FuncArg>, ret: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::FuncDef(funcdef(
        name,
        Color::Red,
        FuncKind::Plain,
        args,
        Expr::name(sp(), ret),
        body,
    ))
}

pub fn blue_func(name: &str, args: Vec<ast::FuncArg>, ret: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::FuncDef(funcdef(
        name,
        Color::Blue,
        FuncKind::Plain,
        args,
        Expr::name(sp(), ret),
        body,
    ))
}

pub fn generic_func(name: &str, args: Vec<ast::FuncArg>, ret: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::FuncDef(funcdef(
        name,
        Color::Blue,
        FuncKind::Generic,
        args,
        Expr::name(sp(), ret),
        body,
    ))
}

pub fn module(body: Vec<Stmt>) -> ast::Module {
    ast::Module::new("test.spy", sp(), body)
}

pub fn load(vm: &mut Vm, body: Vec<Stmt>) -> Arc<WModule> {
    vm.import_module(module(body), "test").expect("module load failed")
}

pub fn global_func(vm: &Vm, fullname: &str) -> Arc<WFunc> {
    match vm.lookup_global(&Fqn::parse(fullname)) {
        Some(Value::Func(func)) => func,
        other => panic!("`{}` is not a function: {:?}", fullname, other),
    }
}

pub fn call(vm: &mut Vm, fullname: &str, args: &[Value]) -> Value {
    let func = global_func(vm, fullname);
    vm.fast_call(&func, args)
        .unwrap_or_else(|err| panic!("call to `{}` failed: {}", fullname, err))
}

/// All FQNs referenced by residual call targets in an expression tree.
pub fn collect_call_targets(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Call(call) => {
            if let Expr::FqnConst(fqn) = call.func.as_ref() {
                out.push(fqn.fqn.to_string());
            }
            collect_call_targets(&call.func, out);
            for arg in &call.args {
                collect_call_targets(arg, out);
            }
        }
        Expr::BinOp(node) => {
            collect_call_targets(&node.left, out);
            collect_call_targets(&node.right, out);
        }
        Expr::Compare(node) => {
            collect_call_targets(&node.left, out);
            collect_call_targets(&node.right, out);
        }
        Expr::UnaryOp(node) => collect_call_targets(&node.value, out),
        Expr::BoolOp(node) => {
            for value in &node.values {
                collect_call_targets(value, out);
            }
        }
        Expr::CallMethod(node) => {
            collect_call_targets(&node.target, out);
            for arg in &node.args {
                collect_call_targets(arg, out);
            }
        }
        Expr::GetAttr(node) => collect_call_targets(&node.value, out),
        Expr::GetItem(node) => {
            collect_call_targets(&node.value, out);
            for arg in &node.args {
                collect_call_targets(arg, out);
            }
        }
        Expr::List(node) => {
            for item in &node.items {
                collect_call_targets(item, out);
            }
        }
        Expr::Tuple(node) => {
            for item in &node.items {
                collect_call_targets(item, out);
            }
        }
        _ => {}
    }
}

pub fn stmt_call_targets(stmts: &[Stmt]) -> Vec<String> {
    let mut out = Vec::new();
    for stmt in stmts {
        collect_stmt_targets(stmt, &mut out);
    }
    out
}

fn collect_stmt_targets(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Expr(node) => collect_call_targets(&node.value, out),
        Stmt::Return(node) => collect_call_targets(&node.value, out),
        Stmt::Assign(node) => collect_call_targets(&node.value, out),
        Stmt::VarDef(node) => collect_call_targets(&node.ty, out),
        Stmt::If(node) => {
            collect_call_targets(&node.test, out);
            for s in node.then_body.iter().chain(&node.else_body) {
                collect_stmt_targets(s, out);
            }
        }
        Stmt::While(node) => {
            collect_call_targets(&node.test, out);
            for s in &node.body {
                collect_stmt_targets(s, out);
            }
        }
        Stmt::Raise(node) => collect_call_targets(&node.exc, out),
        Stmt::Assert(node) => {
            collect_call_targets(&node.test, out);
            if let Some(msg) = &node.msg {
                collect_call_targets(msg, out);
            }
        }
        _ => {}
    }
}

/// The residual body of a redshifted global function.
pub fn residual_body(vm: &Vm, fullname: &str) -> Vec<Stmt> {
    let func = global_func(vm, fullname);
    let astfunc = func.as_astfunc().expect("not an AST function");
    assert!(astfunc.redshifted, "`{}` was not redshifted", fullname);
    astfunc.funcdef.body.clone()
}
