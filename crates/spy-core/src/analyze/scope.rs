//! The scope analyzer.
//!
//! Scoping rules:
//!
//! - names defined at module level are available to all inner scopes;
//! - inside a function, assignment defines a local variable ONLY if the name
//!   does not exist in an outer scope (no `global`/`nonlocal` declarations);
//! - shadowing a name is an error.
//!
//! The analyzer operates in two passes:
//!
//! 1. **declare**: find all statements which introduce new symbols (VarDef,
//!    Assign, FuncDef, ...). Afterwards each symtable contains the names
//!    directly defined in that scope (`level == 0`).
//! 2. **flatten**: for each use of a name, find which scope defines it and
//!    record a reference symbol with the right level. Afterwards each
//!    symtable contains every name defined *or referenced* in its scope.

use crate::ast::{self, Color, Module, ScopeId, VarKind};
use crate::error::{ErrorKind, Level, Result, SpyError};
use crate::span::Span;

use super::symtable::{Storage, SymTable, Symbol, VarKindOrigin};

/// The analyzer's output: one symbol table per scope, indexed by the
/// [`ScopeId`]s stamped into the module's `FuncDef`/`ClassDef` nodes.
#[derive(Debug, Clone)]
pub struct ScopeMap {
    tables: Vec<SymTable>,
}

impl ScopeMap {
    pub fn by_scope(&self, scope: ScopeId) -> &SymTable {
        &self.tables[scope as usize]
    }
}

pub struct ScopeAnalyzer {
    tables: Vec<SymTable>,
    /// Stack of indices into `tables`; position 0 is the builtins scope.
    stack: Vec<usize>,
    loop_depth: u32,
}

const BUILTINS_SCOPE: usize = 0;
const MODULE_SCOPE: usize = 1;

impl ScopeAnalyzer {
    /// `builtin_names` is the set of names importable from the `builtins`
    /// module; the VM provides it so that bare references to `i32`, `print`
    /// and friends resolve.
    pub fn new(modname: impl Into<String>, builtin_names: &[String]) -> ScopeAnalyzer {
        let modname = modname.into();
        let mut builtins_scope = SymTable::new("builtins", Color::Blue);
        for name in builtin_names {
            builtins_scope.add(Symbol {
                name: name.clone(),
                varkind: VarKind::Const,
                origin: VarKindOrigin::Explicit,
                storage: Storage::Direct,
                level: 0,
                span: Span::fake(),
                type_span: Span::fake(),
            });
        }
        let module_scope = SymTable::new(modname, Color::Blue);
        ScopeAnalyzer {
            tables: vec![builtins_scope, module_scope],
            stack: vec![BUILTINS_SCOPE, MODULE_SCOPE],
            loop_depth: 0,
        }
    }

    /// Analyze the module: stamp scope ids and build the symbol tables.
    pub fn analyze(mut self, module: &mut Module) -> Result<ScopeMap> {
        module.scope = MODULE_SCOPE as ScopeId;
        for stmt in &mut module.body {
            self.declare_stmt(stmt)?;
        }
        debug_assert_eq!(self.stack.len(), 2);
        for stmt in &mut module.body {
            self.flatten_stmt(stmt);
        }
        debug_assert_eq!(self.stack.len(), 2);
        Ok(ScopeMap {
            tables: self.tables,
        })
    }

    fn scope(&mut self) -> &mut SymTable {
        let idx = *self.stack.last().unwrap();
        &mut self.tables[idx]
    }

    fn push_scope(&mut self, name: &str, color: Color) -> usize {
        let parent = &self.tables[*self.stack.last().unwrap()].name;
        let fullname = format!("{}::{}", parent, name);
        let idx = self.tables.len();
        self.tables.push(SymTable::new(fullname, color));
        self.stack.push(idx);
        idx
    }

    fn pop_scope(&mut self) {
        self.stack.pop();
    }

    /// Look a name up through the scope stack, innermost first. Returns the
    /// level (0 = current scope) and a copy of the symbol.
    fn lookup_ref(&self, name: &str) -> Option<(u32, Symbol)> {
        for (level, &idx) in self.stack.iter().rev().enumerate() {
            if let Some(sym) = self.tables[idx].lookup(name) {
                return Some((level as u32, sym.clone()));
            }
        }
        None
    }

    fn lookup_definition(&self, name: &str) -> Option<(u32, Symbol)> {
        for (level, &idx) in self.stack.iter().rev().enumerate() {
            if let Some(sym) = self.tables[idx].lookup_definition(name) {
                return Some((level as u32, sym.clone()));
            }
        }
        None
    }

    fn define_name(
        &mut self,
        name: &str,
        varkind: VarKind,
        origin: VarKindOrigin,
        span: Span,
        type_span: Span,
    ) -> Result<()> {
        if let Some((level, sym)) = self.lookup_ref(name) {
            if name != "@return" {
                if level == 0 && self.tables[*self.stack.last().unwrap()].color == Color::Blue {
                    // e.g. the same name declared in both branches of an
                    // `if` inside a blue frame. If the redeclaration happens
                    // at run time it is still an error, caught by the frame.
                    return Ok(());
                }
                let msg = if level == 0 {
                    format!("variable `{}` already declared", name)
                } else {
                    format!("variable `{}` shadows a name declared in an outer scope", name)
                };
                let mut err = SpyError::new(ErrorKind::Scope, msg);
                err.add(Level::Error, "this is the new declaration", span);
                err.add(Level::Note, "this is the previous declaration", sym.span);
                return Err(err.into());
            }
        }

        // module-level vars live in cells, everything else is direct
        let at_module = *self.stack.last().unwrap() == MODULE_SCOPE;
        let storage = if at_module && varkind == VarKind::Var {
            Storage::Cell
        } else {
            Storage::Direct
        };

        self.scope().add(Symbol {
            name: name.to_string(),
            varkind,
            origin,
            storage,
            level: 0,
            span,
            type_span,
        });
        Ok(())
    }

    // ==== declare pass ====

    fn declare_stmt(&mut self, stmt: &mut ast::Stmt) -> Result<()> {
        match stmt {
            ast::Stmt::VarDef(vardef) => self.declare_vardef(vardef),
            ast::Stmt::Assign(assign) => {
                self.declare_target_maybe(&assign.target, assign.target_span, assign.value.span())
            }
            ast::Stmt::AugAssign(node) => {
                self.promote_const_to_var_maybe(&node.target);
                Ok(())
            }
            ast::Stmt::FuncDef(funcdef) => self.declare_funcdef(funcdef),
            ast::Stmt::ClassDef(classdef) => self.declare_classdef(classdef),
            ast::Stmt::If(node) => {
                for stmt in node.then_body.iter_mut().chain(&mut node.else_body) {
                    self.declare_stmt(stmt)?;
                }
                Ok(())
            }
            ast::Stmt::While(node) => {
                self.loop_depth += 1;
                let res = node.body.iter_mut().try_for_each(|s| self.declare_stmt(s));
                self.loop_depth -= 1;
                res
            }
            ast::Stmt::For(node) => self.declare_for(node),
            _ => Ok(()),
        }
    }

    fn declare_vardef(&mut self, vardef: &ast::VarDef) -> Result<()> {
        let at_module = *self.stack.last().unwrap() == MODULE_SCOPE;
        let (varkind, origin) = match vardef.kind {
            Some(kind) => (kind, VarKindOrigin::Explicit),
            None if at_module => (VarKind::Const, VarKindOrigin::GlobalConst),
            None if self.loop_depth > 0 => (VarKind::Var, VarKindOrigin::Auto),
            None => (VarKind::Const, VarKindOrigin::Auto),
        };
        self.define_name(&vardef.name, varkind, origin, vardef.span, vardef.ty.span())
    }

    fn declare_funcdef(&mut self, funcdef: &mut ast::FuncDef) -> Result<()> {
        // the function name goes in the outer scope ...
        self.define_name(
            &funcdef.name,
            VarKind::Const,
            VarKindOrigin::FuncDef,
            funcdef.prototype_span,
            funcdef.prototype_span,
        )?;
        // ... its arguments in the inner one
        let (argkind, arg_origin) = match funcdef.color {
            Color::Red => (VarKind::Var, VarKindOrigin::RedParam),
            Color::Blue => (VarKind::Const, VarKindOrigin::BlueParam),
        };
        let scope = self.push_scope(&funcdef.name, funcdef.color);
        funcdef.scope = scope as ScopeId;
        for arg in &funcdef.args {
            self.define_name(&arg.name, argkind, arg_origin, arg.span, arg.ty.span())?;
        }
        let ret_span = funcdef.return_type.span();
        self.define_name("@return", VarKind::Var, VarKindOrigin::Auto, ret_span, ret_span)?;
        for stmt in &mut funcdef.body {
            self.declare_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn declare_classdef(&mut self, classdef: &mut ast::ClassDef) -> Result<()> {
        self.define_name(
            &classdef.name,
            VarKind::Const,
            VarKindOrigin::ClassDef,
            classdef.span,
            classdef.span,
        )?;
        let scope = self.push_scope(&classdef.name, Color::Blue);
        classdef.scope = scope as ScopeId;
        for field in &classdef.fields {
            self.define_name(
                &field.name,
                VarKind::Var,
                VarKindOrigin::ClassField,
                field.span,
                field.ty.span(),
            )?;
        }
        for method in &mut classdef.methods {
            self.declare_funcdef(method)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn declare_for(&mut self, node: &mut ast::For) -> Result<()> {
        // the hidden iterator variable, plus the loop variable itself. The
        // loop variable has no annotation: its type comes from whatever the
        // iterator yields, so we point type_span at the iterable.
        let iter_name = format!("_$iter{}", node.seq);
        let iter_span = node.iter.span();
        self.define_name(&iter_name, VarKind::Var, VarKindOrigin::Auto, iter_span, iter_span)?;
        self.define_name(
            &node.target,
            VarKind::Var,
            VarKindOrigin::Auto,
            node.target_span,
            iter_span,
        )?;
        self.loop_depth += 1;
        let res = node.body.iter_mut().try_for_each(|s| self.declare_stmt(s));
        self.loop_depth -= 1;
        res
    }

    fn declare_target_maybe(&mut self, target: &str, target_span: Span, value_span: Span) -> Result<()> {
        if self.lookup_ref(target).is_none() {
            // first assignment: implicit declaration, const unless in a loop
            let varkind = if self.loop_depth > 0 {
                VarKind::Var
            } else {
                VarKind::Const
            };
            self.define_name(target, varkind, VarKindOrigin::Auto, target_span, value_span)
        } else {
            self.promote_const_to_var_maybe(target);
            Ok(())
        }
    }

    /// A second assignment to an implicitly-const local turns it into a var.
    fn promote_const_to_var_maybe(&mut self, target: &str) {
        let scope = self.scope();
        if let Some(sym) = scope.lookup_definition(target) {
            if sym.varkind == VarKind::Const && sym.origin == VarKindOrigin::Auto {
                let mut sym = sym.clone();
                sym.varkind = VarKind::Var;
                scope.replace(sym);
            }
        }
    }

    // ==== flatten pass ====

    /// Capture `name` into the current scope if it is defined in an outer
    /// one; record a `Missing` symbol if it is defined nowhere.
    fn capture_maybe(&mut self, name: &str) {
        match self.lookup_ref(name) {
            None => {
                let sym = Symbol {
                    name: name.to_string(),
                    varkind: VarKind::Var,
                    origin: VarKindOrigin::Auto,
                    storage: Storage::Missing,
                    level: 0,
                    span: Span::fake(),
                    type_span: Span::fake(),
                };
                self.scope().add(sym);
            }
            Some((0, _)) => {}
            Some(_) => {
                let (level, sym) = self.lookup_definition(name).expect("reference without definition");
                self.scope().add(sym.with_level(level));
            }
        }
    }

    fn flatten_stmt(&mut self, stmt: &mut ast::Stmt) {
        match stmt {
            ast::Stmt::Pass(_) | ast::Stmt::Break(_) | ast::Stmt::Continue(_) => {}
            ast::Stmt::Expr(node) => self.flatten_expr(&node.value),
            ast::Stmt::Return(node) => self.flatten_expr(&node.value),
            ast::Stmt::VarDef(node) => self.flatten_expr(&node.ty),
            ast::Stmt::Assign(node) => {
                self.capture_maybe(&node.target);
                self.flatten_expr(&node.value);
            }
            ast::Stmt::AugAssign(node) => {
                self.capture_maybe(&node.target);
                self.flatten_expr(&node.value);
            }
            ast::Stmt::SetAttr(node) => {
                self.flatten_expr(&node.target);
                self.flatten_expr(&node.value);
            }
            ast::Stmt::SetItem(node) => {
                self.flatten_expr(&node.target);
                for arg in &node.args {
                    self.flatten_expr(arg);
                }
                self.flatten_expr(&node.value);
            }
            ast::Stmt::If(node) => {
                self.flatten_expr(&node.test);
                for stmt in node.then_body.iter_mut().chain(&mut node.else_body) {
                    self.flatten_stmt(stmt);
                }
            }
            ast::Stmt::While(node) => {
                self.flatten_expr(&node.test);
                for stmt in &mut node.body {
                    self.flatten_stmt(stmt);
                }
            }
            ast::Stmt::For(node) => {
                self.capture_maybe(&node.target);
                self.flatten_expr(&node.iter);
                for stmt in &mut node.body {
                    self.flatten_stmt(stmt);
                }
            }
            ast::Stmt::Raise(node) => self.flatten_expr(&node.exc),
            ast::Stmt::Assert(node) => {
                self.flatten_expr(&node.test);
                if let Some(msg) = &node.msg {
                    self.flatten_expr(msg);
                }
            }
            ast::Stmt::FuncDef(funcdef) => self.flatten_funcdef(funcdef),
            ast::Stmt::ClassDef(classdef) => self.flatten_classdef(classdef),
        }
    }

    fn flatten_funcdef(&mut self, funcdef: &mut ast::FuncDef) {
        // decorators and argument types are evaluated in the outer scope
        for decorator in &funcdef.decorators {
            self.flatten_expr(decorator);
        }
        self.flatten_expr(&funcdef.return_type);
        for arg in &funcdef.args {
            self.flatten_expr(&arg.ty);
        }
        self.stack.push(funcdef.scope as usize);
        for stmt in &mut funcdef.body {
            self.flatten_stmt(stmt);
        }
        self.pop_scope();
    }

    fn flatten_classdef(&mut self, classdef: &mut ast::ClassDef) {
        self.stack.push(classdef.scope as usize);
        for field in &classdef.fields {
            self.flatten_expr(&field.ty);
        }
        for method in &mut classdef.methods {
            self.flatten_funcdef(method);
        }
        self.pop_scope();
    }

    fn flatten_expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Const(_) | ast::Expr::StrConst(_) | ast::Expr::FqnConst(_) => {}
            ast::Expr::Name(name) => self.capture_maybe(&name.id),
            ast::Expr::BinOp(node) => {
                self.flatten_expr(&node.left);
                self.flatten_expr(&node.right);
            }
            ast::Expr::UnaryOp(node) => self.flatten_expr(&node.value),
            ast::Expr::Compare(node) => {
                self.flatten_expr(&node.left);
                self.flatten_expr(&node.right);
            }
            ast::Expr::BoolOp(node) => {
                for value in &node.values {
                    self.flatten_expr(value);
                }
            }
            ast::Expr::Call(node) => {
                self.flatten_expr(&node.func);
                for arg in &node.args {
                    self.flatten_expr(arg);
                }
            }
            ast::Expr::CallMethod(node) => {
                self.flatten_expr(&node.target);
                for arg in &node.args {
                    self.flatten_expr(arg);
                }
            }
            ast::Expr::GetAttr(node) => self.flatten_expr(&node.value),
            ast::Expr::GetItem(node) => {
                self.flatten_expr(&node.value);
                for arg in &node.args {
                    self.flatten_expr(arg);
                }
            }
            ast::Expr::List(node) => {
                for item in &node.items {
                    self.flatten_expr(item);
                }
            }
            ast::Expr::Tuple(node) => {
                for item in &node.items {
                    self.flatten_expr(item);
                }
            }
            ast::Expr::FStr(node) => {
                for part in &node.parts {
                    if let ast::FStrPart::Expr(expr) = part {
                        self.flatten_expr(expr);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, FuncArg, FuncDef, FuncKind, Stmt};
    use pretty_assertions::assert_eq;

    fn builtin_names() -> Vec<String> {
        ["i32", "f64", "bool", "str", "print"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn fake_funcdef(name: &str, color: Color, args: Vec<FuncArg>, body: Vec<Stmt>) -> FuncDef {
        FuncDef {
            span: Span::fake(),
            prototype_span: Span::fake(),
            name: name.to_string(),
            color,
            kind: FuncKind::Plain,
            args,
            return_type: Box::new(Expr::name(Span::fake(), "i32")),
            body,
            decorators: vec![],
            scope: 0,
        }
    }

    fn analyze(body: Vec<Stmt>) -> Result<(Module, ScopeMap)> {
        let mut module = Module::new("test.spy", Span::fake(), body);
        let scopes = ScopeAnalyzer::new("test", &builtin_names()).analyze(&mut module)?;
        Ok((module, scopes))
    }

    #[test]
    fn local_params_are_red_vars() {
        let funcdef = fake_funcdef(
            "foo",
            Color::Red,
            vec![FuncArg {
                span: Span::fake(),
                name: "x".to_string(),
                ty: Expr::name(Span::fake(), "i32"),
            }],
            vec![Stmt::ret(Span::fake(), Expr::name(Span::fake(), "x"))],
        );
        let (module, scopes) = analyze(vec![Stmt::FuncDef(funcdef)]).unwrap();
        let Stmt::FuncDef(funcdef) = &module.body[0] else {
            panic!("expected funcdef")
        };
        let symtable = scopes.by_scope(funcdef.scope);
        let x = symtable.lookup("x").unwrap();
        assert_eq!(x.varkind, VarKind::Var);
        assert_eq!(x.color(), Color::Red);
        assert!(x.is_local());
    }

    #[test]
    fn single_assignment_is_auto_const() {
        let body = vec![Stmt::assign(Span::fake(), "x", Expr::i32(Span::fake(), 1))];
        let funcdef = fake_funcdef("foo", Color::Red, vec![], body);
        let (module, scopes) = analyze(vec![Stmt::FuncDef(funcdef)]).unwrap();
        let Stmt::FuncDef(funcdef) = &module.body[0] else {
            panic!("expected funcdef")
        };
        let x = scopes.by_scope(funcdef.scope).lookup("x").unwrap();
        assert_eq!(x.varkind, VarKind::Const);
        assert_eq!(x.origin, VarKindOrigin::Auto);
    }

    #[test]
    fn double_assignment_promotes_to_var() {
        let body = vec![
            Stmt::assign(Span::fake(), "x", Expr::i32(Span::fake(), 1)),
            Stmt::assign(Span::fake(), "x", Expr::i32(Span::fake(), 2)),
        ];
        let funcdef = fake_funcdef("foo", Color::Red, vec![], body);
        let (module, scopes) = analyze(vec![Stmt::FuncDef(funcdef)]).unwrap();
        let Stmt::FuncDef(funcdef) = &module.body[0] else {
            panic!("expected funcdef")
        };
        let x = scopes.by_scope(funcdef.scope).lookup("x").unwrap();
        assert_eq!(x.varkind, VarKind::Var);
    }

    #[test]
    fn outer_reference_is_captured_with_level() {
        let inner = fake_funcdef(
            "inner",
            Color::Red,
            vec![],
            vec![Stmt::ret(Span::fake(), Expr::name(Span::fake(), "n"))],
        );
        let outer = fake_funcdef(
            "outer",
            Color::Blue,
            vec![FuncArg {
                span: Span::fake(),
                name: "n".to_string(),
                ty: Expr::name(Span::fake(), "i32"),
            }],
            vec![
                Stmt::FuncDef(inner),
                Stmt::ret(Span::fake(), Expr::name(Span::fake(), "inner")),
            ],
        );
        let (module, scopes) = analyze(vec![Stmt::FuncDef(outer)]).unwrap();
        let Stmt::FuncDef(outer) = &module.body[0] else {
            panic!("expected funcdef")
        };
        let Stmt::FuncDef(inner) = &outer.body[0] else {
            panic!("expected funcdef")
        };
        let n = scopes.by_scope(inner.scope).lookup("n").unwrap();
        assert_eq!(n.level, 1);
        let builtin = scopes.by_scope(inner.scope).lookup("i32");
        assert!(builtin.is_none(), "only referenced names are captured");
    }

    #[test]
    fn shadowing_is_an_error() {
        let inner_body = vec![Stmt::assign(Span::fake(), "x", Expr::i32(Span::fake(), 2))];
        let outer = fake_funcdef(
            "outer",
            Color::Red,
            vec![],
            vec![
                Stmt::assign(Span::fake(), "x", Expr::i32(Span::fake(), 1)),
                Stmt::FuncDef(fake_funcdef("inner", Color::Red, vec![], inner_body)),
            ],
        );
        let err = analyze(vec![Stmt::FuncDef(outer)]).unwrap_err();
        assert!(err.matches(ErrorKind::Scope));
    }

    #[test]
    fn missing_name_is_recorded() {
        let funcdef = fake_funcdef(
            "foo",
            Color::Red,
            vec![],
            vec![Stmt::ret(Span::fake(), Expr::name(Span::fake(), "nope"))],
        );
        let (module, scopes) = analyze(vec![Stmt::FuncDef(funcdef)]).unwrap();
        let Stmt::FuncDef(funcdef) = &module.body[0] else {
            panic!("expected funcdef")
        };
        let sym = scopes.by_scope(funcdef.scope).lookup("nope").unwrap();
        assert_eq!(sym.storage, Storage::Missing);
    }
}
