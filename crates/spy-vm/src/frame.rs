//! The frame evaluator: one tree walker, two modes.
//!
//! In *interp* mode every node is evaluated and produces a value. In
//! *redshift* mode only blue subtrees are evaluated; red subexpressions
//! produce residual AST nodes instead, with resolved call targets. The two
//! modes share every dispatch decision — an expression is described by the
//! same [`OpArg`] either way, and the same [`OpImpl`] that runs in interp
//! mode is frozen into a call node during redshift. Keeping one walker is
//! what guarantees interp/redshift equivalence.
//!
//! Control flow uses an explicit [`Flow`] result instead of unwinding;
//! `break`/`continue`/`return` bubble up through statement execution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use spy_core::analyze::{ScopeMap, Storage, SymTable, Symbol, VarKindOrigin};
use spy_core::ast::{self, BoolOpKind, ClassKind, Color, FuncKind, Lit, VarKind};
use spy_core::error::{Error, ErrorKind, Level, Result, SpyError};
use spy_core::fqn::Fqn;
use spy_core::span::Span;

use crate::doppler::ErrorMode;
use crate::opimpl::{OpImpl, OpImplTarget, ArgSpec};
use crate::opspec::OpArg;
use crate::value::{
    new_namespace, AstFunc, FuncParam, FuncType, Namespace, StructField, Ty, TyBody, TyKind,
    Value, WFunc, WLifted, WList, WStruct,
};
use crate::vm::Vm;

/// Result of evaluating one expression: the abstract value, plus — in
/// redshift mode — the residual expression.
#[derive(Debug, Clone)]
pub struct Eval {
    pub arg: OpArg,
    pub shifted: Option<ast::Expr>,
}

impl Eval {
    fn shifted(&self) -> ast::Expr {
        self.shifted
            .clone()
            .expect("missing residual expression in redshift mode")
    }
}

/// What a statement did.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// A copy of the local environment, taken before shifting one branch of a
/// red `if` so the other branch starts from the same state.
#[derive(Clone)]
struct EnvSnapshot {
    types: HashMap<String, Ty>,
    colors: HashMap<String, Color>,
    decl_spans: HashMap<String, Span>,
    values: HashMap<String, Value>,
}

pub struct Frame<'vm> {
    pub vm: &'vm mut Vm,
    /// The function being run; absent for module and class-body frames.
    func: Option<Arc<WFunc>>,
    /// Namespace prefix for globals minted by this frame.
    ns: Fqn,
    scopes: Arc<ScopeMap>,
    scope: ast::ScopeId,
    closure: Vec<Namespace>,
    locals: Namespace,
    locals_types: HashMap<String, Ty>,
    locals_colors: HashMap<String, Color>,
    locals_decl_span: HashMap<String, Span>,
    redshifting: bool,
    error_mode: ErrorMode,
    /// Set for module frames: locals are mirrored into the module dict.
    module: Option<Arc<crate::module::WModule>>,
}

impl<'vm> Frame<'vm> {
    /// A frame to run an AST function in interp mode.
    pub fn new(vm: &'vm mut Vm, func: &Arc<WFunc>) -> Result<Frame<'vm>> {
        Frame::with_mode(vm, func, false)
    }

    /// A frame to redshift an AST function.
    pub fn redshift(vm: &'vm mut Vm, func: &Arc<WFunc>, error_mode: ErrorMode) -> Result<Frame<'vm>> {
        let mut frame = Frame::with_mode(vm, func, true)?;
        frame.error_mode = error_mode;
        Ok(frame)
    }

    fn with_mode(vm: &'vm mut Vm, func: &Arc<WFunc>, redshifting: bool) -> Result<Frame<'vm>> {
        let astfunc = func.as_astfunc().ok_or_else(|| {
            Error::spy(ErrorKind::Value, "cannot build a frame for a builtin function")
        })?;
        let ns = func.fqn.clone();
        Ok(Frame {
            vm,
            ns,
            scopes: astfunc.scopes.clone(),
            scope: astfunc.funcdef.scope,
            closure: astfunc.closure.clone(),
            locals: new_namespace(),
            locals_types: HashMap::new(),
            locals_colors: HashMap::new(),
            locals_decl_span: HashMap::new(),
            redshifting,
            error_mode: ErrorMode::Eager,
            module: None,
            func: Some(func.clone()),
        })
    }

    /// A frame executing the top level of a module.
    pub fn for_module(
        vm: &'vm mut Vm,
        ns: Fqn,
        scopes: Arc<ScopeMap>,
        scope: ast::ScopeId,
        module: Arc<crate::module::WModule>,
    ) -> Frame<'vm> {
        let closure = vec![vm.builtins_namespace()];
        Frame {
            vm,
            func: None,
            ns,
            scopes,
            scope,
            closure,
            locals: new_namespace(),
            locals_types: HashMap::new(),
            locals_colors: HashMap::new(),
            locals_decl_span: HashMap::new(),
            redshifting: false,
            error_mode: ErrorMode::Eager,
            module: Some(module),
        }
    }

    /// Blue functions get their type arguments as qualifiers, so the inner
    /// definitions of `make_fn(f64)` land under `make_fn[f64]::...`. This is
    /// about readable names, not correctness: uniqueness is still enforced
    /// by `get_unique_fqn`.
    pub fn qualify_ns(&mut self, args: &[Value]) {
        if self.func.as_ref().map(|f| f.is_blue()) != Some(true) {
            return;
        }
        let quals: Vec<_> = args
            .iter()
            .filter_map(|v| match v {
                Value::Type(ty) => Some(spy_core::fqn::Qualifier::value(ty.human_name())),
                _ => None,
            })
            .collect();
        if !quals.is_empty() {
            self.ns = self.ns.with_qualifiers(quals);
        }
    }

    fn funcdef(&self) -> Arc<ast::FuncDef> {
        self.func
            .as_ref()
            .and_then(|f| f.as_astfunc())
            .map(|ast| ast.funcdef.clone())
            .expect("not a function frame")
    }

    fn symtable(&self) -> &SymTable {
        self.scopes.by_scope(self.scope)
    }

    // ==== locals ====

    pub fn declare_local(&mut self, name: &str, ty: Ty, span: Span) -> Result<()> {
        if let Some(old_span) = self.locals_decl_span.get(name) {
            let mut err = SpyError::new(
                ErrorKind::Scope,
                format!("variable `{}` already declared", name),
            );
            err.add(Level::Error, "this is the new declaration", span);
            err.add(Level::Note, "this is the previous declaration", *old_span);
            return Err(err.into());
        }
        if ty.as_functype().is_none() {
            // every local's type must be addressable by the emitter
            self.vm.make_fqn_const(&Value::Type(ty.clone()))?;
        }
        self.locals_types.insert(name.to_string(), ty);
        self.locals_decl_span.insert(name.to_string(), span);
        Ok(())
    }

    pub fn store_local(&mut self, name: &str, value: Value) {
        if let Some(module) = &self.module {
            module.setattr(name, value.clone());
        }
        self.locals.lock().unwrap().insert(name.to_string(), value);
    }

    fn local_is_bound(&self, name: &str) -> bool {
        self.locals.lock().unwrap().contains_key(name)
    }

    pub fn load_local(&self, name: &str, span: Span) -> Result<Value> {
        self.locals.lock().unwrap().get(name).cloned().ok_or_else(|| {
            Error::simple(
                ErrorKind::Exception,
                format!("read from uninitialized local `{}`", name),
                "read here",
                span,
            )
        })
    }

    // ==== running a function ====

    pub fn run(&mut self, args: &[Value]) -> Result<Value> {
        let funcdef = self.funcdef();
        self.qualify_ns(args);
        self.declare_signature()?;
        self.init_arguments(&funcdef, args);

        for stmt in &funcdef.body {
            if let ast::Stmt::ClassDef(classdef) = stmt {
                self.fwdecl_classdef(classdef)?;
            }
        }

        let mut out = Vec::new();
        for stmt in &funcdef.body {
            match self.exec_stmt(stmt, &mut out)? {
                Flow::Normal => {}
                Flow::Return(value) => return Ok(value),
                Flow::Break | Flow::Continue => {
                    return Err(Error::simple(
                        ErrorKind::Syntax,
                        "`break`/`continue` outside of a loop",
                        "here",
                        stmt.span(),
                    ))
                }
            }
        }

        // fell off the end: fine for void functions, an error otherwise
        let functype = &self.func.as_ref().unwrap().functype;
        if functype.restype == self.vm.builtins().none_ty {
            Ok(Value::None)
        } else {
            Err(Error::simple(
                ErrorKind::Type,
                "reached the end of the function without a `return`",
                "no return",
                funcdef.span.end_span(),
            ))
        }
    }

    /// Declare the implicit slots and the parameters. Used by both modes.
    pub fn declare_signature(&mut self) -> Result<()> {
        let funcdef = self.funcdef();
        let functype = self.func.as_ref().unwrap().functype.clone();
        let b = self.vm.builtins();
        let bool_ty = b.bool.clone();
        self.declare_local("@if", bool_ty.clone(), Span::fake())?;
        self.declare_local("@while", bool_ty.clone(), Span::fake())?;
        self.declare_local("@assert", bool_ty.clone(), Span::fake())?;
        self.declare_local("@and", bool_ty.clone(), Span::fake())?;
        self.declare_local("@or", bool_ty.clone(), Span::fake())?;
        self.declare_local(
            "@return",
            functype.restype.clone(),
            funcdef.return_type.span(),
        )?;
        for (i, param) in functype.params.iter().enumerate() {
            let arg = &funcdef.args[i];
            self.declare_local(&arg.name, param.ty.clone(), arg.span)?;
            // red function parameters are red, blue function parameters blue
            self.locals_colors.insert(arg.name.clone(), funcdef.color);
        }
        Ok(())
    }

    /// Redshift mode entry: shift the whole body, producing the residual
    /// statements and the final local type table.
    pub fn redshift_body(&mut self) -> Result<(Vec<ast::Stmt>, HashMap<String, Ty>)> {
        debug_assert!(self.redshifting);
        let funcdef = self.funcdef();
        self.declare_signature()?;
        for stmt in &funcdef.body {
            if let ast::Stmt::ClassDef(classdef) = stmt {
                self.fwdecl_classdef(classdef)?;
            }
        }
        let mut out = Vec::new();
        for stmt in &funcdef.body {
            self.exec_stmt(stmt, &mut out)?;
        }
        Ok((out, self.locals_types.clone()))
    }

    fn init_arguments(&mut self, funcdef: &ast::FuncDef, args: &[Value]) {
        for (arg, value) in funcdef.args.iter().zip(args) {
            self.store_local(&arg.name, value.clone());
        }
    }

    // ==== statements ====

    pub fn exec_stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let result = self
            .exec_stmt_inner(stmt, out)
            .map_err(|err| err.with_span_maybe(stmt.span()));
        match result {
            Err(err)
                if self.redshifting
                    && self.error_mode == ErrorMode::Lazy
                    && err.as_spy().is_some_and(|spy| spy.is_static()) =>
            {
                // lazy mode: defer the static error to run time as a raise
                // of the prebuilt exception
                let spy = match err {
                    Error::Spy(spy) => spy,
                    Error::Generic(_) => unreachable!(),
                };
                let exc_ty = match spy.kind {
                    ErrorKind::Type => self.vm.builtins().type_error.clone(),
                    _ => self.vm.builtins().static_error.clone(),
                };
                let exc = crate::value::WException {
                    ty: exc_ty,
                    message: spy.message.clone(),
                    annotations: spy.annotations.clone(),
                };
                let value = Value::Exception(Arc::new(exc));
                let fqn = self.vm.make_fqn_const(&value)?;
                self.vm.warnings.push(spy);
                out.push(ast::Stmt::Raise(ast::Raise {
                    span: stmt.span(),
                    exc: ast::Expr::fqn_const(stmt.span(), fqn),
                }));
                Ok(Flow::Normal)
            }
            other => other,
        }
    }

    fn exec_stmt_inner(&mut self, stmt: &ast::Stmt, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        trace!(redshift = self.redshifting, "exec {:?}", std::mem::discriminant(stmt));
        match stmt {
            ast::Stmt::Pass(node) => {
                if self.redshifting {
                    out.push(ast::Stmt::Pass(node.clone()));
                }
                Ok(Flow::Normal)
            }
            ast::Stmt::Expr(node) => {
                let ev = self.eval_expr(&node.value, None)?;
                if self.redshifting && ev.arg.color == Color::Red {
                    out.push(ast::Stmt::expr(node.span, ev.shifted()));
                }
                Ok(Flow::Normal)
            }
            ast::Stmt::Return(node) => {
                let ev = self.eval_expr(&node.value, Some("@return"))?;
                if self.redshifting {
                    out.push(ast::Stmt::Return(ast::Return {
                        span: node.span,
                        value: ev.shifted(),
                    }));
                    Ok(Flow::Normal)
                } else {
                    Ok(Flow::Return(ev.arg.value().clone()))
                }
            }
            ast::Stmt::VarDef(node) => self.exec_vardef(node, out),
            ast::Stmt::Assign(node) => self.exec_assign(node, out),
            ast::Stmt::AugAssign(node) => {
                // desugar `x += e` into `x = x + e`
                let assign = ast::Assign {
                    span: node.span,
                    target_span: node.target_span,
                    target: node.target.clone(),
                    value: ast::Expr::binop(
                        node.span,
                        node.op,
                        ast::Expr::name(node.target_span, node.target.clone()),
                        node.value.clone(),
                    ),
                };
                self.exec_assign(&assign, out)
            }
            ast::Stmt::SetAttr(node) => self.exec_setattr(node, out),
            ast::Stmt::SetItem(node) => self.exec_setitem(node, out),
            ast::Stmt::If(node) => self.exec_if(node, out),
            ast::Stmt::While(node) => self.exec_while(node, out),
            ast::Stmt::For(node) => self.exec_for(node, out),
            ast::Stmt::Break(node) => {
                if self.redshifting {
                    out.push(ast::Stmt::Break(node.clone()));
                    Ok(Flow::Normal)
                } else {
                    Ok(Flow::Break)
                }
            }
            ast::Stmt::Continue(node) => {
                if self.redshifting {
                    out.push(ast::Stmt::Continue(node.clone()));
                    Ok(Flow::Normal)
                } else {
                    Ok(Flow::Continue)
                }
            }
            ast::Stmt::Raise(node) => self.exec_raise(node, out),
            ast::Stmt::Assert(node) => self.exec_assert(node, out),
            ast::Stmt::FuncDef(node) => self.exec_funcdef(node),
            ast::Stmt::ClassDef(node) => self.exec_classdef(node),
        }
    }

    fn exec_vardef(&mut self, node: &ast::VarDef, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let (ty, ev) = self.eval_expr_type(&node.ty)?;
        self.declare_local(&node.name, ty, node.span)?;
        let sym_color = self
            .symtable()
            .lookup(&node.name)
            .map(|sym| sym.color())
            .unwrap_or(Color::Red);
        self.locals_colors.insert(node.name.clone(), sym_color);
        if self.redshifting {
            out.push(ast::Stmt::VarDef(ast::VarDef {
                span: node.span,
                kind: node.kind,
                name: node.name.clone(),
                ty: ev.shifted(),
            }));
        }
        Ok(Flow::Normal)
    }

    fn exec_assign(&mut self, node: &ast::Assign, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let sym = self
            .symtable()
            .lookup(&node.target)
            .cloned()
            .unwrap_or_else(|| Symbol {
                name: node.target.clone(),
                varkind: VarKind::Var,
                origin: VarKindOrigin::Auto,
                storage: Storage::Missing,
                level: 0,
                span: node.target_span,
                type_span: node.target_span,
            });

        match sym.storage {
            Storage::Missing => Err(Error::simple(
                ErrorKind::Name,
                format!("name `{}` is not defined", node.target),
                "not found in this scope",
                node.target_span,
            )),
            Storage::Cell if sym.is_local() => self.exec_assign_cell_local(node, &sym, out),
            Storage::Cell => self.exec_assign_cell_outer(node, &sym, out),
            Storage::Direct if !sym.is_local() => {
                // assigning to a closed-over name: those are const
                let mut err = SpyError::new(ErrorKind::Type, "invalid assignment target");
                err.add(
                    Level::Error,
                    format!("`{}` is const", sym.name),
                    node.target_span,
                );
                err.add(Level::Note, "const declared here", sym.span);
                Err(err.into())
            }
            Storage::Direct => self.exec_assign_local(node, &sym, out),
        }
    }

    fn exec_assign_local(
        &mut self,
        node: &ast::Assign,
        sym: &Symbol,
        out: &mut Vec<ast::Stmt>,
    ) -> Result<Flow> {
        // a second binding of a const is an error; the first one is the
        // definition itself
        if sym.color() == Color::Blue && self.local_is_bound(&node.target) {
            let mut err = SpyError::new(ErrorKind::Type, "invalid assignment target");
            err.add(
                Level::Error,
                format!("`{}` is const", sym.name),
                node.target_span,
            );
            err.add(Level::Note, "const declared here", sym.span);
            err.add(
                Level::Note,
                format!("help: declare it as variable: `var {} ...`", sym.name),
                sym.span,
            );
            return Err(err.into());
        }

        let declared = self.locals_types.contains_key(&node.target);
        let ev = if declared {
            self.eval_expr(&node.value, Some(&node.target))?
        } else {
            let ev = self.eval_expr(&node.value, None)?;
            self.declare_local(&node.target, ev.arg.static_ty.clone(), node.target_span)?;
            ev
        };

        let color = match sym.varkind {
            VarKind::Var => Color::Red,
            VarKind::Const => ev.arg.color,
        };
        self.locals_colors.insert(node.target.clone(), color);

        if !self.redshifting || color == Color::Blue {
            self.store_local(&node.target, ev.arg.value().clone());
        }
        if self.redshifting {
            out.push(ast::Stmt::Assign(ast::Assign {
                span: node.span,
                target_span: node.target_span,
                target: node.target.clone(),
                value: ev.shifted(),
            }));
        }
        Ok(Flow::Normal)
    }

    /// First or repeated assignment to a module-level `var`: the value lives
    /// in a VM-global cell.
    fn exec_assign_cell_local(
        &mut self,
        node: &ast::Assign,
        _sym: &Symbol,
        out: &mut Vec<ast::Stmt>,
    ) -> Result<Flow> {
        let declared = self.locals_types.contains_key(&node.target);
        let ev = if declared {
            self.eval_expr(&node.value, Some(&node.target))?
        } else {
            let ev = self.eval_expr(&node.value, None)?;
            self.declare_local(&node.target, ev.arg.static_ty.clone(), node.target_span)?;
            ev
        };
        self.locals_colors.insert(node.target.clone(), Color::Red);

        if !self.redshifting {
            let existing = self.locals.lock().unwrap().get(&node.target).cloned();
            match existing {
                Some(Value::Cell(cell)) => {
                    cell.set(ev.arg.value().clone());
                }
                _ => {
                    let fqn = self.ns.join(&node.target);
                    let cell = crate::value::WCell::new(fqn.clone(), ev.arg.value().clone());
                    self.vm.add_global(fqn, Value::Cell(cell.clone()))?;
                    self.store_local(&node.target, Value::Cell(cell));
                }
            }
        }
        if self.redshifting {
            out.push(ast::Stmt::Assign(ast::Assign {
                span: node.span,
                target_span: node.target_span,
                target: node.target.clone(),
                value: ev.shifted(),
            }));
        }
        Ok(Flow::Normal)
    }

    /// Assignment to a module-level `var` from inside a function.
    fn exec_assign_cell_outer(
        &mut self,
        node: &ast::Assign,
        sym: &Symbol,
        out: &mut Vec<ast::Stmt>,
    ) -> Result<Flow> {
        let level = sym.level as usize;
        let namespace = self.closure[self.closure.len() - level].clone();
        let cell = match namespace.lock().unwrap().get(&node.target) {
            Some(Value::Cell(cell)) => cell.clone(),
            _ => {
                return Err(Error::simple(
                    ErrorKind::Name,
                    format!("module variable `{}` is not initialized", node.target),
                    "assigned here",
                    node.target_span,
                ))
            }
        };
        let ev = self.eval_expr(&node.value, None)?;
        if !self.redshifting {
            cell.set(ev.arg.value().clone());
        }
        if self.redshifting {
            out.push(ast::Stmt::Assign(ast::Assign {
                span: node.span,
                target_span: node.target_span,
                target: node.target.clone(),
                value: ev.shifted(),
            }));
        }
        Ok(Flow::Normal)
    }

    fn exec_setattr(&mut self, node: &ast::SetAttr, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let target = self.eval_expr(&node.target, None)?;
        let attr = self.synth_str(node.span, &node.attr, 1);
        let value = self.eval_expr(&node.value, None)?;
        let op = self.vm.builtins().ops.setattr.clone();
        let opimpl = self.vm.call_op(
            node.span,
            &op,
            vec![
                target.arg.clone().with_idx(0),
                attr.arg.clone().with_idx(1),
                value.arg.clone().with_idx(2),
            ],
        )?;
        let ev = self.eval_opimpl(node.span, &opimpl, &[target, attr, value])?;
        if self.redshifting {
            out.push(ast::Stmt::expr(node.span, ev.shifted()));
        }
        Ok(Flow::Normal)
    }

    fn exec_setitem(&mut self, node: &ast::SetItem, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let target = self.eval_expr(&node.target, None)?;
        let mut operands = vec![target];
        for arg in &node.args {
            operands.push(self.eval_expr(arg, None)?);
        }
        operands.push(self.eval_expr(&node.value, None)?);
        let opargs: Vec<OpArg> = operands
            .iter()
            .enumerate()
            .map(|(i, ev)| ev.arg.clone().with_idx(i))
            .collect();
        let op = self.vm.builtins().ops.setitem.clone();
        let opimpl = self.vm.call_op(node.span, &op, opargs)?;
        let ev = self.eval_opimpl(node.span, &opimpl, &operands)?;
        if self.redshifting {
            out.push(ast::Stmt::expr(node.span, ev.shifted()));
        }
        Ok(Flow::Normal)
    }

    fn exec_if(&mut self, node: &ast::If, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let test = self.eval_expr(&node.test, Some("@if"))?;

        if self.redshifting && test.arg.color == Color::Red {
            // both branches survive; each gets its own copy of the local
            // type environment, merged afterwards
            let snapshot = self.env_snapshot();
            let mut then_out = Vec::new();
            for stmt in &node.then_body {
                self.exec_stmt(stmt, &mut then_out)?;
            }
            let then_env = self.env_snapshot();
            self.env_restore(snapshot.clone());
            let mut else_out = Vec::new();
            for stmt in &node.else_body {
                self.exec_stmt(stmt, &mut else_out)?;
            }
            self.env_merge(then_env);
            out.push(ast::Stmt::If(ast::If {
                span: node.span,
                test: test.shifted(),
                then_body: then_out,
                else_body: else_out,
            }));
            return Ok(Flow::Normal);
        }

        // the condition is known: run (or inline) the branch it picks
        let cond = match test.arg.value() {
            Value::Bool(b) => *b,
            other => {
                return Err(Error::simple(
                    ErrorKind::Type,
                    format!("`if` condition must be `bool`, got `{}`", self.vm.dynamic_type(other)),
                    "here",
                    node.test.span(),
                ))
            }
        };
        let body = if cond { &node.then_body } else { &node.else_body };
        for stmt in body {
            match self.exec_stmt(stmt, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_while(&mut self, node: &ast::While, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        if self.redshifting {
            let test = self.eval_expr(&node.test, Some("@while"))?;
            let mut body_out = Vec::new();
            for stmt in &node.body {
                self.exec_stmt(stmt, &mut body_out)?;
            }
            out.push(ast::Stmt::While(ast::While {
                span: node.span,
                test: test.shifted(),
                body: body_out,
            }));
            return Ok(Flow::Normal);
        }

        loop {
            let test = self.eval_expr(&node.test, Some("@while"))?;
            match test.arg.value() {
                Value::Bool(true) => {}
                Value::Bool(false) => break,
                other => {
                    return Err(Error::simple(
                        ErrorKind::Type,
                        format!(
                            "`while` condition must be `bool`, got `{}`",
                            self.vm.dynamic_type(other)
                        ),
                        "here",
                        node.test.span(),
                    ))
                }
            }
            let mut flow = Flow::Normal;
            for stmt in &node.body {
                flow = self.exec_stmt(stmt, out)?;
                match flow {
                    Flow::Normal => {}
                    _ => break,
                }
            }
            match flow {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    /// Desugar `for` into the iterator protocol:
    ///
    /// ```text
    /// _$iterN = seq.__iter__()
    /// while _$iterN.__continue_iteration__():
    ///     target = _$iterN.__item__()
    ///     _$iterN = _$iterN.__next__()
    ///     <body>
    /// ```
    ///
    /// The body comes after `__next__`, so `continue` works out of the box.
    fn exec_for(&mut self, node: &ast::For, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let span = node.span;
        let iter_name = format!("_$iter{}", node.seq);
        let init_iter = ast::Stmt::assign(
            span,
            iter_name.clone(),
            ast::Expr::call_method(span, node.iter.clone(), "__iter__", vec![]),
        );
        let assign_item = ast::Stmt::assign(
            span,
            node.target.clone(),
            ast::Expr::call_method(
                span,
                ast::Expr::name(span, iter_name.clone()),
                "__item__",
                vec![],
            ),
        );
        let advance = ast::Stmt::assign(
            span,
            iter_name.clone(),
            ast::Expr::call_method(
                span,
                ast::Expr::name(span, iter_name.clone()),
                "__next__",
                vec![],
            ),
        );
        let mut body = vec![assign_item, advance];
        body.extend(node.body.iter().cloned());
        let while_loop = ast::Stmt::While(ast::While {
            span,
            test: ast::Expr::call_method(
                span,
                ast::Expr::name(span, iter_name),
                "__continue_iteration__",
                vec![],
            ),
            body,
        });
        match self.exec_stmt(&init_iter, out)? {
            Flow::Normal => {}
            flow => return Ok(flow),
        }
        self.exec_stmt(&while_loop, out)
    }

    fn exec_raise(&mut self, node: &ast::Raise, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let exc = self.eval_expr(&node.exc, None)?;
        let op = self.vm.builtins().ops.raise_.clone();
        let opimpl = self
            .vm
            .call_op(node.span, &op, vec![exc.arg.clone().with_idx(0)])?;
        let ev = self.eval_opimpl(node.span, &opimpl, &[exc])?;
        if self.redshifting {
            out.push(ast::Stmt::expr(node.span, ev.shifted()));
        }
        Ok(Flow::Normal)
    }

    fn exec_assert(&mut self, node: &ast::Assert, out: &mut Vec<ast::Stmt>) -> Result<Flow> {
        let test = self.eval_expr(&node.test, Some("@assert"))?;

        if self.redshifting && test.arg.color == Color::Red {
            let msg = match &node.msg {
                Some(msg) => Some(self.eval_expr(msg, None)?.shifted()),
                None => None,
            };
            out.push(ast::Stmt::Assert(ast::Assert {
                span: node.span,
                test: test.shifted(),
                msg,
            }));
            return Ok(Flow::Normal);
        }

        if test.arg.value().as_bool() == Some(true) {
            return Ok(Flow::Normal);
        }
        let mut plain_msg = "assertion failed".to_string();
        if let Some(msg) = &node.msg {
            let ev = self.eval_expr(msg, None)?;
            match ev.arg.value() {
                Value::Str(s) => plain_msg = s.as_str().to_string(),
                other => {
                    return Err(Error::simple(
                        ErrorKind::Type,
                        format!(
                            "expected `str`, got `{}`",
                            self.vm.dynamic_type(other).human_name()
                        ),
                        "assertion message",
                        msg.span(),
                    ))
                }
            }
        }
        Err(Error::simple(
            ErrorKind::Assertion,
            plain_msg,
            "assertion failed",
            node.span,
        ))
    }

    fn exec_funcdef(&mut self, node: &ast::FuncDef) -> Result<Flow> {
        if !node.decorators.is_empty() {
            return Err(Error::simple(
                ErrorKind::Wip,
                "decorators are resolved by the parser; explicit decorator expressions are not supported",
                "decorated function",
                node.span,
            ));
        }
        let mut params = Vec::new();
        for arg in &node.args {
            let (ty, _) = self.eval_expr_type(&arg.ty)?;
            params.push(FuncParam::simple(arg.name.clone(), ty));
        }
        let (restype, _) = self.eval_expr_type(&node.return_type)?;
        let functype = FuncType::new(params, restype, node.color, node.kind);

        let fqn = self.vm.get_unique_fqn(&self.ns.join(&node.name));
        let mut closure = self.closure.clone();
        closure.push(self.locals.clone());
        let astfunc = AstFunc {
            funcdef: Arc::new(node.clone()),
            closure,
            scopes: self.scopes.clone(),
            redshifted: false,
            locals_types: HashMap::new(),
        };
        let func = WFunc::ast(fqn.clone(), functype, astfunc);
        let value = Value::Func(func);
        self.vm.add_global(fqn, value.clone())?;

        let ty = self.vm.dynamic_type(&value);
        self.declare_local(&node.name, ty, node.prototype_span)?;
        self.locals_colors.insert(node.name.clone(), Color::Blue);
        self.store_local(&node.name, value);
        Ok(Flow::Normal)
    }

    pub(crate) fn fwdecl_classdef(&mut self, node: &ast::ClassDef) -> Result<()> {
        let fqn = self.vm.get_unique_fqn(&self.ns.join(&node.name));
        let kind = match node.kind {
            ClassKind::Struct => TyKind::Struct,
            ClassKind::Typelift => TyKind::Lifted,
        };
        let ty = Ty::declare(fqn.clone(), kind);
        let value = Value::Type(ty);
        self.vm.add_global(fqn, value.clone())?;
        let type_ty = self.vm.builtins().type_ty.clone();
        self.declare_local(&node.name, type_ty, node.span)?;
        self.locals_colors.insert(node.name.clone(), Color::Blue);
        self.store_local(&node.name, value);
        Ok(())
    }

    fn exec_classdef(&mut self, node: &ast::ClassDef) -> Result<Flow> {
        let ty = match self.load_local(&node.name, node.span)? {
            Value::Type(ty) => ty,
            other => {
                return Err(Error::spy(
                    ErrorKind::Value,
                    format!("classdef target is not a type: {}", other),
                ))
            }
        };
        debug_assert!(!ty.is_defined());

        // evaluate field types in a class-body frame sharing our closure
        let mut closure = self.closure.clone();
        closure.push(self.locals.clone());
        let mut fields = Vec::new();
        let mut offset = 0u32;
        {
            let mut class_frame = Frame {
                vm: &mut *self.vm,
                func: None,
                ns: ty.fqn().clone(),
                scopes: self.scopes.clone(),
                scope: node.scope,
                closure,
                locals: new_namespace(),
                locals_types: HashMap::new(),
                locals_colors: HashMap::new(),
                locals_decl_span: HashMap::new(),
                redshifting: false,
                error_mode: ErrorMode::Eager,
                module: None,
            };
            for field in &node.fields {
                let (field_ty, _) = class_frame.eval_expr_type(&field.ty)?;
                let size = field_ty.size().unwrap_or(8);
                fields.push(StructField {
                    name: field.name.clone(),
                    ty: field_ty,
                    offset,
                });
                offset += size.max(1);
            }
            for method in &node.methods {
                class_frame.exec_funcdef(method)?;
            }
            // collect the methods the class frame defined
            let mut dict: HashMap<String, Value> = HashMap::new();
            for method in &node.methods {
                let value = class_frame.load_local(&method.name, method.span)?;
                dict.insert(method.name.clone(), value);
            }
            match node.kind {
                ClassKind::Struct => {
                    class_frame.define_struct(&ty, fields, offset, dict)?;
                }
                ClassKind::Typelift => {
                    class_frame.define_typelift(&ty, fields, dict, node.span)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    /// Finalize a struct type: layout, generated constructor (`__make__`,
    /// doubling as `__new__` unless overridden) and per-field read
    /// accessors.
    fn define_struct(
        &mut self,
        ty: &Ty,
        fields: Vec<StructField>,
        size: u32,
        mut dict: HashMap<String, Value>,
    ) -> Result<()> {
        let make_fqn = ty.fqn().join("__make__");
        let make_functype = FuncType::new(
            fields
                .iter()
                .map(|f| FuncParam::simple(f.name.clone(), f.ty.clone()))
                .collect(),
            ty.clone(),
            Color::Red,
            FuncKind::Plain,
        );
        let field_names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
        let struct_ty = ty.clone();
        let make = WFunc::builtin(
            make_fqn.clone(),
            make_functype,
            true,
            Arc::new(move |_vm: &mut Vm, args: &[Value]| {
                let fields = field_names
                    .iter()
                    .cloned()
                    .zip(args.iter().cloned())
                    .collect();
                Ok(Value::Struct(Arc::new(WStruct {
                    ty: struct_ty.clone(),
                    fields,
                })))
            }),
        );
        self.vm.store_global(make_fqn, Value::Func(make.clone()));
        dict.insert("__make__".to_string(), Value::Func(make.clone()));
        dict.entry("__new__".to_string())
            .or_insert(Value::Func(make));

        for field in &fields {
            let accessor_name = format!("__get_{}__", field.name);
            let accessor_fqn = ty.fqn().join(&accessor_name);
            let field_name = field.name.clone();
            let getter = WFunc::builtin(
                accessor_fqn.clone(),
                FuncType::new(
                    vec![FuncParam::simple("self", ty.clone())],
                    field.ty.clone(),
                    Color::Red,
                    FuncKind::Plain,
                ),
                true,
                Arc::new(move |_vm: &mut Vm, args: &[Value]| match &args[0] {
                    Value::Struct(s) => s.field(&field_name).cloned().ok_or_else(|| {
                        Error::spy(
                            ErrorKind::Value,
                            format!("struct has no field `{}`", field_name),
                        )
                    }),
                    other => Err(Error::spy(
                        ErrorKind::Type,
                        format!("field read applied to {}", other),
                    )),
                }),
            );
            self.vm.store_global(accessor_fqn, Value::Func(getter.clone()));
            dict.insert(accessor_name, Value::Func(getter));
        }

        ty.define(TyBody {
            base: Some(self.vm.builtins().object.clone()),
            size: Some(size),
            dict,
            fields,
            ll_ty: None,
        });
        Ok(())
    }

    /// Finalize a lifted type: the single `__ll__` field names the low-level
    /// representation, `__lift__`/`__unlift__` convert between the two.
    fn define_typelift(
        &mut self,
        ty: &Ty,
        fields: Vec<StructField>,
        mut dict: HashMap<String, Value>,
        span: Span,
    ) -> Result<()> {
        let ll_ty = match fields.as_slice() {
            [field] if field.name == "__ll__" => field.ty.clone(),
            _ => {
                return Err(Error::simple(
                    ErrorKind::Type,
                    "a typelift class must declare exactly one field, `__ll__`",
                    "declared here",
                    span,
                ))
            }
        };

        let lift_fqn = ty.fqn().join("__lift__");
        let lifted_ty = ty.clone();
        let lift = WFunc::builtin(
            lift_fqn.clone(),
            FuncType::new(
                vec![FuncParam::simple("ll", ll_ty.clone())],
                ty.clone(),
                Color::Red,
                FuncKind::Plain,
            ),
            true,
            Arc::new(move |_vm: &mut Vm, args: &[Value]| {
                Ok(Value::Lifted(Arc::new(WLifted {
                    ty: lifted_ty.clone(),
                    ll: args[0].clone(),
                })))
            }),
        );
        self.vm.store_global(lift_fqn, Value::Func(lift.clone()));
        dict.insert("__lift__".to_string(), Value::Func(lift));

        let unlift_fqn = ty.fqn().join("__unlift__");
        let unlift = WFunc::builtin(
            unlift_fqn.clone(),
            FuncType::new(
                vec![FuncParam::simple("self", ty.clone())],
                ll_ty.clone(),
                Color::Red,
                FuncKind::Plain,
            ),
            true,
            Arc::new(|_vm: &mut Vm, args: &[Value]| match &args[0] {
                Value::Lifted(lifted) => Ok(lifted.ll.clone()),
                other => Err(Error::spy(
                    ErrorKind::Type,
                    format!("__unlift__ applied to {}", other),
                )),
            }),
        );
        self.vm.store_global(unlift_fqn, Value::Func(unlift.clone()));
        dict.insert("__unlift__".to_string(), Value::Func(unlift));

        ty.define(TyBody {
            base: Some(self.vm.builtins().object.clone()),
            size: ll_ty.size(),
            dict,
            fields,
            ll_ty: Some(ll_ty),
        });
        Ok(())
    }

    // ==== the local type environment ====

    fn env_snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            types: self.locals_types.clone(),
            colors: self.locals_colors.clone(),
            decl_spans: self.locals_decl_span.clone(),
            values: self.locals.lock().unwrap().clone(),
        }
    }

    fn env_restore(&mut self, snap: EnvSnapshot) {
        self.locals_types = snap.types;
        self.locals_colors = snap.colors;
        self.locals_decl_span = snap.decl_spans;
        *self.locals.lock().unwrap() = snap.values;
    }

    /// Merge the environment left by one `if` branch into the one left by
    /// the other: only bindings that both branches agree on survive.
    fn env_merge(&mut self, other: EnvSnapshot) {
        self.locals_types
            .retain(|name, ty| other.types.get(name) == Some(ty));
        let types = &self.locals_types;
        self.locals_colors
            .retain(|name, _| types.contains_key(name));
        self.locals_decl_span
            .retain(|name, _| types.contains_key(name));
        let mut values = self.locals.lock().unwrap();
        values.retain(|name, value| {
            types.contains_key(name)
                && other
                    .values
                    .get(name)
                    .is_some_and(|v| v.cache_key() == value.cache_key())
        });
    }

    // ==== expressions ====

    pub fn eval_expr(&mut self, expr: &ast::Expr, varname: Option<&str>) -> Result<Eval> {
        let mut ev = self
            .eval_expr_inner(expr)
            .map_err(|err| err.with_span_maybe(expr.span()))?;

        // blue results fold into constants during redshift
        if self.redshifting && ev.arg.color == Color::Blue {
            let value = ev.arg.value().clone();
            ev.shifted = Some(self.make_const(expr.span(), &value)?);
        }

        // typecheck against the declared type of the receiving slot
        if let Some(varname) = varname {
            let expected = self.locals_types.get(varname).cloned().ok_or_else(|| {
                Error::spy(
                    ErrorKind::Value,
                    format!("slot `{}` has no declared type", varname),
                )
            })?;
            let conv = crate::builtins::convop::convert_maybe(self.vm, &expected, &ev.arg)
                .map_err(|err| self.annotate_slot_mismatch(err, varname))?;
            if let Some(conv) = conv {
                if self.redshifting {
                    let inner = ev.shifted();
                    ev.shifted = Some(ast::Expr::call(
                        expr.span(),
                        ast::Expr::fqn_const(expr.span(), conv.fqn.clone()),
                        vec![inner],
                    ));
                    // a converted blue value stays blue; red operands stay
                    // abstract, the conversion happens at run time
                    ev.arg.val = match ev.arg.val.take() {
                        Some(value) if ev.arg.color == Color::Blue => {
                            Some(self.vm.fast_call(&conv, &[value])?)
                        }
                        _ => None,
                    };
                    ev.arg.static_ty = conv.functype.restype.clone();
                } else {
                    let value = self.vm.fast_call(&conv, &[ev.arg.value().clone()])?;
                    ev.arg.static_ty = conv.functype.restype.clone();
                    ev.arg.val = Some(value);
                }
            }
        }
        Ok(ev)
    }

    fn annotate_slot_mismatch(&self, err: Error, varname: &str) -> Error {
        let because = match varname {
            "@return" => " because of return type",
            "@if" | "@while" | "@assert" | "@and" | "@or" => "",
            _ => " because of type declaration",
        };
        let expected = self
            .locals_types
            .get(varname)
            .map(|ty| ty.human_name())
            .unwrap_or_default();
        let span = self
            .symtable()
            .lookup(varname)
            .map(|sym| sym.type_span)
            .unwrap_or_else(Span::fake);
        err.note(format!("expected `{}`{}", expected, because), span)
    }

    /// Evaluate an expression that must denote a type (blue).
    pub fn eval_expr_type(&mut self, expr: &ast::Expr) -> Result<(Ty, Eval)> {
        let ev = self.eval_expr(expr, None)?;
        match ev.arg.blue_value()? {
            Value::Type(ty) => {
                let ty = ty.clone();
                self.vm.make_fqn_const(&Value::Type(ty.clone()))?;
                Ok((ty, ev))
            }
            Value::None => Ok((self.vm.builtins().none_ty.clone(), ev)),
            other => Err(Error::simple(
                ErrorKind::Type,
                format!(
                    "expected `type`, got `{}`",
                    self.vm.dynamic_type(other).human_name()
                ),
                "expected `type`",
                expr.span(),
            )),
        }
    }

    fn eval_expr_inner(&mut self, expr: &ast::Expr) -> Result<Eval> {
        match expr {
            ast::Expr::Const(node) => {
                let value = match &node.value {
                    Lit::Bool(b) => Value::Bool(*b),
                    Lit::I8(x) => Value::I8(*x),
                    Lit::I32(x) => Value::I32(*x),
                    Lit::F64(x) => Value::F64(*x),
                    Lit::None => Value::None,
                };
                let ty = self.vm.dynamic_type(&value);
                Ok(Eval {
                    arg: OpArg::blue(ty, value, node.span),
                    shifted: None,
                })
            }
            ast::Expr::StrConst(node) => Ok(Eval {
                arg: OpArg::blue(
                    self.vm.builtins().str.clone(),
                    Value::str(node.value.clone()),
                    node.span,
                ),
                shifted: None,
            }),
            ast::Expr::FqnConst(node) => {
                let value = self.vm.lookup_global(&node.fqn).ok_or_else(|| {
                    Error::spy(ErrorKind::Name, format!("unknown FQN `{}`", node.fqn))
                })?;
                let ty = self.vm.dynamic_type(&value);
                Ok(Eval {
                    arg: OpArg::blue(ty, value, node.span),
                    shifted: None,
                })
            }
            ast::Expr::Name(node) => self.eval_name(node),
            ast::Expr::BinOp(node) => {
                let l = self.eval_expr(&node.left, None)?;
                let r = self.eval_expr(&node.right, None)?;
                let op = self.vm.builtins().ops.from_binop(node.op).clone();
                let opimpl = self.vm.call_op(
                    node.span,
                    &op,
                    vec![l.arg.clone().with_idx(0), r.arg.clone().with_idx(1)],
                )?;
                self.eval_opimpl(node.span, &opimpl, &[l, r])
            }
            ast::Expr::Compare(node) => {
                let l = self.eval_expr(&node.left, None)?;
                let r = self.eval_expr(&node.right, None)?;
                let op = self.vm.builtins().ops.from_cmpop(node.op).clone();
                let opimpl = self.vm.call_op(
                    node.span,
                    &op,
                    vec![l.arg.clone().with_idx(0), r.arg.clone().with_idx(1)],
                )?;
                self.eval_opimpl(node.span, &opimpl, &[l, r])
            }
            ast::Expr::UnaryOp(node) => {
                let v = self.eval_expr(&node.value, None)?;
                let op = self.vm.builtins().ops.from_unaryop(node.op).clone();
                let opimpl = self
                    .vm
                    .call_op(node.span, &op, vec![v.arg.clone().with_idx(0)])?;
                self.eval_opimpl(node.span, &opimpl, &[v])
            }
            ast::Expr::BoolOp(node) => self.eval_boolop(node),
            ast::Expr::Call(node) => {
                let f = self.eval_expr(&node.func, None)?;
                let mut operands = vec![f];
                for arg in &node.args {
                    operands.push(self.eval_expr(arg, None)?);
                }
                let opargs: Vec<OpArg> = operands
                    .iter()
                    .enumerate()
                    .map(|(i, ev)| ev.arg.clone().with_idx(i))
                    .collect();
                let op = self.vm.builtins().ops.call.clone();
                let opimpl = self.vm.call_op(node.span, &op, opargs)?;
                self.eval_opimpl(node.span, &opimpl, &operands)
            }
            ast::Expr::CallMethod(node) => {
                let target = self.eval_expr(&node.target, None)?;
                let meth = self.synth_str(node.span, &node.method, 1);
                let mut operands = vec![target, meth];
                for arg in &node.args {
                    operands.push(self.eval_expr(arg, None)?);
                }
                let opargs: Vec<OpArg> = operands
                    .iter()
                    .enumerate()
                    .map(|(i, ev)| ev.arg.clone().with_idx(i))
                    .collect();
                let op = self.vm.builtins().ops.call_method.clone();
                let opimpl = self.vm.call_op(node.span, &op, opargs)?;
                self.eval_opimpl(node.span, &opimpl, &operands)
            }
            ast::Expr::GetAttr(node) => {
                let value = self.eval_expr(&node.value, None)?;
                let attr = self.synth_str(node.span, &node.attr, 1);
                let op = self.vm.builtins().ops.getattr.clone();
                let opimpl = self.vm.call_op(
                    node.span,
                    &op,
                    vec![value.arg.clone().with_idx(0), attr.arg.clone().with_idx(1)],
                )?;
                self.eval_opimpl(node.span, &opimpl, &[value, attr])
            }
            ast::Expr::GetItem(node) => {
                let value = self.eval_expr(&node.value, None)?;
                let mut operands = vec![value];
                for arg in &node.args {
                    operands.push(self.eval_expr(arg, None)?);
                }
                let opargs: Vec<OpArg> = operands
                    .iter()
                    .enumerate()
                    .map(|(i, ev)| ev.arg.clone().with_idx(i))
                    .collect();
                let op = self.vm.builtins().ops.getitem.clone();
                let opimpl = self.vm.call_op(node.span, &op, opargs)?;
                self.eval_opimpl(node.span, &opimpl, &operands)
            }
            ast::Expr::List(node) => self.eval_list(node),
            ast::Expr::Tuple(node) => self.eval_tuple(node),
            ast::Expr::FStr(node) => self.eval_fstr(node),
        }
    }

    fn eval_name(&mut self, node: &ast::Name) -> Result<Eval> {
        let sym = match self.symtable().lookup(&node.id) {
            Some(sym) => sym.clone(),
            None => {
                return Err(Error::simple(
                    ErrorKind::Name,
                    format!("name `{}` is not defined", node.id),
                    "not found in this scope",
                    node.span,
                ))
            }
        };
        if sym.storage == Storage::Missing {
            return Err(Error::simple(
                ErrorKind::Name,
                format!("name `{}` is not defined", node.id),
                "not found in this scope",
                node.span,
            ));
        }

        if sym.is_local() {
            let color = self
                .locals_colors
                .get(&node.id)
                .copied()
                .unwrap_or_else(|| sym.color());
            let (color, ty, val) = if color == Color::Red && self.redshifting {
                let ty = self.locals_types.get(&node.id).cloned().ok_or_else(|| {
                    Error::simple(
                        ErrorKind::Name,
                        format!("read from uninitialized local `{}`", node.id),
                        "read here",
                        node.span,
                    )
                })?;
                (Color::Red, ty, None)
            } else {
                let value = self.load_local(&node.id, node.span)?;
                match value {
                    Value::Cell(cell) => {
                        let inner = cell.get();
                        (Color::Red, self.vm.dynamic_type(&inner), Some(inner))
                    }
                    value => {
                        let ty = self
                            .locals_types
                            .get(&node.id)
                            .cloned()
                            .unwrap_or_else(|| self.vm.dynamic_type(&value));
                        (color, ty, Some(value))
                    }
                }
            };
            return Ok(Eval {
                arg: OpArg {
                    color,
                    static_ty: ty,
                    val,
                    span: node.span,
                    idx: None,
                    sym: Some(sym),
                },
                shifted: self
                    .redshifting
                    .then(|| ast::Expr::Name(node.clone())),
            });
        }

        // outer reference, through the closure chain
        let level = sym.level as usize;
        let namespace = self.closure[self.closure.len() - level].clone();
        let value = namespace.lock().unwrap().get(&node.id).cloned();
        let value = value.ok_or_else(|| {
            Error::simple(
                ErrorKind::Name,
                format!("name `{}` is not initialized in its scope", node.id),
                "read here",
                node.span,
            )
        })?;
        match value {
            Value::Cell(cell) => {
                let inner = cell.get();
                let ty = self.vm.dynamic_type(&inner);
                Ok(Eval {
                    arg: OpArg {
                        color: Color::Red,
                        static_ty: ty,
                        val: Some(inner),
                        span: node.span,
                        idx: None,
                        sym: Some(sym),
                    },
                    shifted: self
                        .redshifting
                        .then(|| ast::Expr::Name(node.clone())),
                })
            }
            value => {
                // closed-over direct bindings are always blue
                let ty = self.vm.dynamic_type(&value);
                Ok(Eval {
                    arg: OpArg {
                        color: Color::Blue,
                        static_ty: ty,
                        val: Some(value),
                        span: node.span,
                        idx: None,
                        sym: Some(sym),
                    },
                    shifted: None,
                })
            }
        }
    }

    fn eval_boolop(&mut self, node: &ast::BoolOp) -> Result<Eval> {
        let varname = match node.op {
            BoolOpKind::And => "@and",
            BoolOpKind::Or => "@or",
        };

        if !self.redshifting {
            // short-circuit left to right
            let last = node.values.len() - 1;
            for (i, expr) in node.values.iter().enumerate() {
                let ev = self.eval_expr(expr, Some(varname))?;
                let b = ev.arg.value().as_bool().ok_or_else(|| {
                    Error::simple(
                        ErrorKind::Type,
                        "boolean operator requires `bool` operands",
                        "here",
                        expr.span(),
                    )
                })?;
                let short_circuit = match node.op {
                    BoolOpKind::And => !b,
                    BoolOpKind::Or => b,
                };
                if short_circuit || i == last {
                    return Ok(ev);
                }
            }
            unreachable!("BoolOp with no operands");
        }

        // redshift: evaluate all operands; fold only if every one is blue
        let mut evals = Vec::with_capacity(node.values.len());
        for expr in &node.values {
            evals.push(self.eval_expr(expr, Some(varname))?);
        }
        let color = Color::meet(evals.iter().map(|e| e.arg.color));
        let bool_ty = self.vm.builtins().bool.clone();
        if color == Color::Blue {
            let mut result = node.op == BoolOpKind::And;
            for ev in &evals {
                let b = ev.arg.value().as_bool().unwrap_or(false);
                match node.op {
                    BoolOpKind::And => {
                        result = b;
                        if !b {
                            break;
                        }
                    }
                    BoolOpKind::Or => {
                        result = b;
                        if b {
                            break;
                        }
                    }
                }
            }
            return Ok(Eval {
                arg: OpArg::blue(bool_ty, Value::Bool(result), node.span),
                shifted: None,
            });
        }
        Ok(Eval {
            arg: OpArg::red(bool_ty, None, node.span),
            shifted: Some(ast::Expr::BoolOp(ast::BoolOp {
                span: node.span,
                op: node.op,
                values: evals.iter().map(|e| e.shifted()).collect(),
            })),
        })
    }

    fn eval_list(&mut self, node: &ast::ListExpr) -> Result<Eval> {
        let mut evals = Vec::with_capacity(node.items.len());
        let mut item_ty: Option<Ty> = None;
        for item in &node.items {
            let ev = self.eval_expr(item, None)?;
            item_ty = Some(match item_ty {
                None => ev.arg.static_ty.clone(),
                Some(ty) => self.vm.union_type(&ty, &ev.arg.static_ty),
            });
            evals.push(ev);
        }
        let item_ty = item_ty.ok_or_else(|| {
            Error::simple(
                ErrorKind::Wip,
                "empty list literals are not supported (the item type is unknown)",
                "empty list",
                node.span,
            )
        })?;
        let list_ty = self.vm.make_list_type(&item_ty);

        // lists are mutable reference values, so a list literal is red
        let val = if self.redshifting {
            None
        } else {
            let items: Vec<Value> = evals.iter().map(|e| e.arg.value().clone()).collect();
            Some(Value::List(Arc::new(WList {
                ty: list_ty.clone(),
                items: std::sync::Mutex::new(items),
            })))
        };
        Ok(Eval {
            arg: OpArg::red(list_ty, val, node.span),
            shifted: self.redshifting.then(|| {
                ast::Expr::List(ast::ListExpr {
                    span: node.span,
                    items: evals.iter().map(|e| e.shifted()).collect(),
                })
            }),
        })
    }

    fn eval_tuple(&mut self, node: &ast::TupleExpr) -> Result<Eval> {
        let mut evals = Vec::with_capacity(node.items.len());
        for item in &node.items {
            evals.push(self.eval_expr(item, None)?);
        }
        let color = Color::meet(evals.iter().map(|e| e.arg.color));
        let tuple_ty = self.vm.builtins().tuple_ty.clone();
        let val = if color == Color::Red && self.redshifting {
            None
        } else {
            Some(Value::tuple(
                evals.iter().map(|e| e.arg.value().clone()).collect(),
            ))
        };
        Ok(Eval {
            arg: OpArg {
                color,
                static_ty: tuple_ty,
                val,
                span: node.span,
                idx: None,
                sym: None,
            },
            shifted: self.redshifting.then(|| {
                ast::Expr::Tuple(ast::TupleExpr {
                    span: node.span,
                    items: evals.iter().map(|e| e.shifted()).collect(),
                })
            }),
        })
    }

    /// f-strings evaluate to a chain of string concatenations; interpolated
    /// parts go through the `STR` operator first.
    fn eval_fstr(&mut self, node: &ast::FStr) -> Result<Eval> {
        let str_ty = self.vm.builtins().str.clone();
        let mut acc: Option<Eval> = None;
        for part in &node.parts {
            let piece = match part {
                ast::FStrPart::Text(text) => Eval {
                    arg: OpArg::blue(str_ty.clone(), Value::str(text.clone()), node.span),
                    shifted: None,
                },
                ast::FStrPart::Expr(expr) => {
                    let ev = self.eval_expr(expr, None)?;
                    if ev.arg.static_ty == str_ty {
                        ev
                    } else {
                        let op = self.vm.builtins().ops.str_conv.clone();
                        let opimpl = self
                            .vm
                            .call_op(expr.span(), &op, vec![ev.arg.clone().with_idx(0)])?;
                        self.eval_opimpl(expr.span(), &opimpl, &[ev])?
                    }
                }
            };
            let piece = self.ensure_shifted(piece, node.span)?;
            acc = Some(match acc {
                None => piece,
                Some(acc) => {
                    let acc = self.ensure_shifted(acc, node.span)?;
                    let op = self.vm.builtins().ops.add.clone();
                    let opimpl = self.vm.call_op(
                        node.span,
                        &op,
                        vec![acc.arg.clone().with_idx(0), piece.arg.clone().with_idx(1)],
                    )?;
                    self.eval_opimpl(node.span, &opimpl, &[acc, piece])?
                }
            });
        }
        Ok(acc.unwrap_or(Eval {
            arg: OpArg::blue(str_ty, Value::str(""), node.span),
            shifted: None,
        }))
    }

    /// Blue sub-results built outside `eval_expr` have no residual form yet;
    /// give them one before they become operands of a residual call.
    fn ensure_shifted(&mut self, mut ev: Eval, span: Span) -> Result<Eval> {
        if self.redshifting && ev.shifted.is_none() {
            let value = ev.arg.value().clone();
            ev.shifted = Some(self.make_const(span, &value)?);
        }
        Ok(ev)
    }

    /// A synthesized blue string operand (attribute and method names).
    fn synth_str(&mut self, span: Span, s: &str, idx: usize) -> Eval {
        Eval {
            arg: OpArg::blue(
                self.vm.builtins().str.clone(),
                Value::str(s.to_string()),
                span,
            )
            .with_idx(idx),
            shifted: self
                .redshifting
                .then(|| ast::Expr::str(span, s.to_string())),
        }
    }

    // ==== operator execution ====

    /// Run (or residualize) one resolved operation. `operands` are the
    /// call-site operands in the order the opimpl's `ArgSpec::Arg` indices
    /// refer to.
    pub fn eval_opimpl(
        &mut self,
        span: Span,
        opimpl: &Arc<OpImpl>,
        operands: &[Eval],
    ) -> Result<Eval> {
        let color = if opimpl.is_pure() {
            Color::meet(operands.iter().map(|e| e.arg.color))
        } else {
            opimpl.color
        };

        let val = if color == Color::Red && self.redshifting {
            None
        } else {
            // execution needs concrete values; during redshift a valueless
            // operand here means a blue function received a red argument
            if self.redshifting {
                for ev in operands {
                    if ev.arg.val.is_none() {
                        return Err(Error::simple(
                            ErrorKind::Type,
                            "blue function called with a red argument",
                            "this is red",
                            ev.arg.span,
                        ));
                    }
                }
            }
            let values: Vec<Value> = operands.iter().map(|e| e.arg.value().clone()).collect();
            let result = opimpl.execute(self.vm, &values).map_err(|err| {
                match &opimpl.target {
                    OpImplTarget::Func(func) => {
                        err.note(format!("`{}` called here", func.fqn), span)
                    }
                    _ => err,
                }
            })?;
            Some(result)
        };

        let shifted = if self.redshifting && color == Color::Red {
            Some(self.shift_opimpl(span, opimpl, operands)?)
        } else {
            None
        };

        Ok(Eval {
            arg: OpArg {
                color,
                static_ty: opimpl.restype.clone(),
                val,
                span,
                idx: None,
                sym: None,
            },
            shifted,
        })
    }

    /// Freeze a resolved operation into a residual call node.
    fn shift_opimpl(
        &mut self,
        span: Span,
        opimpl: &Arc<OpImpl>,
        operands: &[Eval],
    ) -> Result<ast::Expr> {
        match &opimpl.target {
            OpImplTarget::Const(value) => {
                let value = value.clone();
                self.make_const(span, &value)
            }
            OpImplTarget::Func(func) => {
                let fqn = self.vm.make_fqn_const(&Value::Func(func.clone()))?;
                let mut args = Vec::with_capacity(opimpl.args.len());
                for spec in &opimpl.args {
                    args.push(self.shift_argspec(spec, operands)?);
                }
                Ok(ast::Expr::call(
                    span,
                    ast::Expr::fqn_const(span, fqn),
                    args,
                ))
            }
            OpImplTarget::Direct => {
                let callee = self.shift_argspec(&opimpl.args[0], operands)?;
                let mut args = Vec::with_capacity(opimpl.args.len() - 1);
                for spec in &opimpl.args[1..] {
                    args.push(self.shift_argspec(spec, operands)?);
                }
                Ok(ast::Expr::call(span, callee, args))
            }
        }
    }

    fn shift_argspec(&mut self, spec: &ArgSpec, operands: &[Eval]) -> Result<ast::Expr> {
        match spec {
            ArgSpec::Arg(i) => Ok(operands[*i].shifted()),
            ArgSpec::Const { value, span } => self.make_const(*span, value),
            ArgSpec::Convert { conv, inner } => {
                // a pure conversion of a compile-time-known operand folds
                // here instead of surviving as a residual call
                if conv.pure {
                    if let Some(value) = argspec_blue_value(inner, operands) {
                        let conv = conv.clone();
                        let folded = self.vm.fast_call(&conv, &[value])?;
                        let span = match inner.as_ref() {
                            ArgSpec::Arg(i) => operands[*i].arg.span,
                            ArgSpec::Const { span, .. } => *span,
                            ArgSpec::Convert { .. } => Span::fake(),
                        };
                        return self.make_const(span, &folded);
                    }
                }
                let inner = self.shift_argspec(inner, operands)?;
                let span = inner.span();
                Ok(ast::Expr::call(
                    span,
                    ast::Expr::fqn_const(span, conv.fqn.clone()),
                    vec![inner],
                ))
            }
        }
    }

    /// The residual form of a compile-time value. Primitive values become
    /// literals; everything else is referenced by FQN as a prebuilt
    /// constant.
    pub fn make_const(&mut self, span: Span, value: &Value) -> Result<ast::Expr> {
        match value {
            Value::None => Ok(ast::Expr::none(span)),
            Value::Bool(b) => Ok(ast::Expr::bool(span, *b)),
            Value::I8(x) => Ok(ast::Expr::const_(span, Lit::I8(*x))),
            Value::I32(x) => Ok(ast::Expr::i32(span, *x)),
            Value::F64(x) => Ok(ast::Expr::f64(span, *x)),
            Value::Str(s) => Ok(ast::Expr::str(span, s.as_str().to_string())),
            // by-value aggregates reconstruct through their generated
            // constructor; there is no prebuilt storage for them
            Value::Struct(s) => {
                let make = s.ty.lookup_func("__make__").ok_or_else(|| {
                    Error::spy(
                        ErrorKind::Wip,
                        format!("no constant form for values of type `{}`", s.ty),
                    )
                })?;
                let mut args = Vec::with_capacity(s.fields.len());
                for (_, field_value) in &s.fields {
                    args.push(self.make_const(span, field_value)?);
                }
                Ok(ast::Expr::call(
                    span,
                    ast::Expr::fqn_const(span, make.fqn.clone()),
                    args,
                ))
            }
            Value::Lifted(lifted) => {
                let lift = lifted.ty.lookup_func("__lift__").ok_or_else(|| {
                    Error::spy(
                        ErrorKind::Wip,
                        format!("no constant form for values of type `{}`", lifted.ty),
                    )
                })?;
                let ll = self.make_const(span, &lifted.ll)?;
                Ok(ast::Expr::call(
                    span,
                    ast::Expr::fqn_const(span, lift.fqn.clone()),
                    vec![ll],
                ))
            }
            other => {
                let fqn = self.vm.make_fqn_const(other)?;
                Ok(ast::Expr::fqn_const(span, fqn))
            }
        }
    }
}

/// The compile-time value an argspec resolves to, if any.
fn argspec_blue_value(spec: &ArgSpec, operands: &[Eval]) -> Option<Value> {
    match spec {
        ArgSpec::Arg(i) => {
            let arg = &operands[*i].arg;
            arg.is_blue().then(|| arg.value().clone())
        }
        ArgSpec::Const { value, .. } => Some(value.clone()),
        ArgSpec::Convert { .. } => None,
    }
}
