//! Module-level execution: running the top level of a source module to
//! populate its globals.
//!
//! Module bodies run in interp mode inside a frame whose locals are mirrored
//! into the module dict. Bindings default to const (blue); `var` bindings are
//! promoted to VM-global cells. If the module defines a blue `__INIT__`
//! function, it runs once at the end of loading with the module as argument.

use std::sync::Arc;

use spy_core::analyze::ScopeAnalyzer;
use spy_core::ast;
use spy_core::error::{Error, ErrorKind, Level, Result, SpyError};
use spy_core::fqn::Fqn;

use crate::frame::{Flow, Frame};
use crate::module::WModule;
use crate::value::Value;
use crate::vm::Vm;

pub fn run_module(vm: &mut Vm, mut module_ast: ast::Module, modname: &str) -> Result<Arc<WModule>> {
    let builtin_names = vm.builtin_names();
    let scopes = ScopeAnalyzer::new(modname, &builtin_names).analyze(&mut module_ast)?;
    let scopes = Arc::new(scopes);

    let wmod = Arc::new(WModule::new(modname, Some(module_ast.filename.clone())));
    vm.register_module(wmod.clone())?;
    let ns = Fqn::module(modname);

    {
        let mut frame = Frame::for_module(vm, ns, scopes, module_ast.scope, wmod.clone());
        for stmt in &module_ast.body {
            if let ast::Stmt::ClassDef(classdef) = stmt {
                frame.fwdecl_classdef(classdef)?;
            }
        }
        let mut out = Vec::new();
        for stmt in &module_ast.body {
            match frame.exec_stmt(stmt, &mut out)? {
                Flow::Normal => {}
                _ => {
                    return Err(Error::simple(
                        ErrorKind::Syntax,
                        "control-flow statement at module level",
                        "here",
                        stmt.span(),
                    ))
                }
            }
        }
    }

    if let Some(Value::Func(init)) = wmod.getattr_maybe("__INIT__") {
        if !init.is_blue() {
            let mut err = SpyError::new(ErrorKind::Type, "the __INIT__ function must be @blue");
            if let Some(astfunc) = init.as_astfunc() {
                err.add(
                    Level::Error,
                    "function defined here",
                    astfunc.funcdef.prototype_span,
                );
            }
            return Err(err.into());
        }
        vm.fast_call(&init, &[Value::Module(wmod.clone())])?;
    }

    Ok(wmod)
}
