//! The virtual machine.
//!
//! One `Vm` owns all process-wide state: the global FQN registry (written
//! during initialization and module loading, read-only afterwards), the
//! module table, the blue cache, the heap and the captured stdout. The VM is
//! also the calling convention: `fast_call` runs any function with blue
//! memoization, `call_op` runs an OPERATOR to resolve a call site.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use spy_core::ast::{Color, FuncKind};
use spy_core::error::{Error, ErrorKind, Level, Result, SpyError};
use spy_core::fqn::{Fqn, Qualifier};
use spy_core::source_map::SourceMap;
use spy_core::span::Span;

use crate::bluecache::BlueCache;
use crate::builtins::{self, Builtins};
use crate::doppler::{self, ErrorMode};
use crate::frame::Frame;
use crate::heap::Heap;
use crate::module::{ModuleRegistry, WModule};
use crate::opimpl::OpImpl;
use crate::opspec::{OpArg, OpSpec};
use crate::value::{
    new_namespace, FuncParam, FuncType, Namespace, Ty, TyBody, TyKind, Value, ValueKey, WFunc,
    WStruct,
};

pub struct Vm {
    pub source_map: SourceMap,
    globals: IndexMap<Fqn, Value>,
    modules: IndexMap<String, Arc<WModule>>,
    pub bluecache: BlueCache,
    pub heap: Heap,
    /// Lines printed by `print` calls, captured for the embedder.
    pub stdout: Vec<String>,
    /// Warnings collected during lazy-mode redshift.
    pub warnings: Vec<SpyError>,
    b: Builtins,
    /// The namespace every module frame closes over.
    builtins_ns: Namespace,
    /// Blue calls currently being evaluated, for cycle reports.
    blue_stack: Vec<Fqn>,
    /// Generic type instantiations (`list[i32]`, `ptr[Point]`), keyed by the
    /// instantiated FQN so repeated instantiation returns the same value.
    instantiations: HashMap<Fqn, Ty>,
    /// Values that were given a synthesized FQN by `make_fqn_const`.
    prebuilt: HashMap<ValueKey, Fqn>,
    /// Functions currently in the `Resolving` state of redshift.
    redshift_in_progress: std::collections::HashSet<Fqn>,
}

impl Vm {
    pub fn new() -> Vm {
        let (b, registries) = builtins::create();
        let mut vm = Vm {
            source_map: SourceMap::new(),
            globals: IndexMap::new(),
            modules: IndexMap::new(),
            bluecache: BlueCache::new(),
            heap: Heap::new(),
            stdout: Vec::new(),
            warnings: Vec::new(),
            b,
            builtins_ns: new_namespace(),
            blue_stack: Vec::new(),
            instantiations: HashMap::new(),
            prebuilt: HashMap::new(),
            redshift_in_progress: std::collections::HashSet::new(),
        };
        for reg in registries {
            vm.install_registry(reg);
        }
        let builtins_mod = vm.modules.get("builtins").expect("builtins module").clone();
        {
            let mut ns = vm.builtins_ns.lock().unwrap();
            for key in builtins_mod.keys() {
                if let Some(value) = builtins_mod.getattr_maybe(&key) {
                    ns.insert(key, value);
                }
            }
        }
        vm
    }

    fn install_registry(&mut self, reg: ModuleRegistry) {
        let module = Arc::new(WModule::new(reg.modname.clone(), None));
        self.modules.insert(reg.modname.clone(), module.clone());
        for (fqn, value) in reg.content {
            module.setattr(fqn.attr.clone(), value.clone());
            self.add_global(fqn, value).expect("builtin FQN conflict");
        }
        for (fqn, value) in reg.hidden {
            self.add_global(fqn, value).expect("builtin FQN conflict");
        }
        for (attr, value) in reg.aliases {
            module.setattr(attr, value);
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.b
    }

    /// The names importable without qualification; the scope analyzer needs
    /// them.
    pub fn builtin_names(&self) -> Vec<String> {
        self.modules
            .get("builtins")
            .map(|m| m.keys())
            .unwrap_or_default()
    }

    pub fn builtins_namespace(&self) -> Namespace {
        self.builtins_ns.clone()
    }

    // ==== the global registry ====

    pub fn add_global(&mut self, fqn: Fqn, value: Value) -> Result<()> {
        if self.globals.contains_key(&fqn) {
            return Err(Error::spy(
                ErrorKind::Value,
                format!("`{}` already exists", fqn),
            ));
        }
        self.globals.insert(fqn, value);
        Ok(())
    }

    /// Overwrite an existing global; used when redshift replaces a function
    /// with its residual form.
    pub fn store_global(&mut self, fqn: Fqn, value: Value) {
        self.globals.insert(fqn, value);
    }

    pub fn lookup_global(&self, fqn: &Fqn) -> Option<Value> {
        if fqn.is_module() {
            return self
                .modules
                .get(&fqn.modname)
                .map(|m| Value::Module(m.clone()));
        }
        self.globals.get(fqn).cloned()
    }

    pub fn register_module(&mut self, module: Arc<WModule>) -> Result<()> {
        if self.modules.contains_key(&module.name) {
            return Err(Error::spy(
                ErrorKind::Import,
                format!("module `{}` already registered", module.name),
            ));
        }
        self.modules.insert(module.name.clone(), module);
        Ok(())
    }

    pub fn lookup_module(&self, name: &str) -> Option<Arc<WModule>> {
        self.modules.get(name).cloned()
    }

    /// A free variant of `fqn`: the FQN itself if unused, else the first
    /// free `#n` suffix.
    pub fn get_unique_fqn(&self, fqn: &Fqn) -> Fqn {
        if !self.globals.contains_key(fqn) {
            return fqn.clone();
        }
        for n in 1.. {
            let candidate = fqn.with_suffix(n);
            if !self.globals.contains_key(&candidate) {
                return candidate;
            }
        }
        unreachable!()
    }

    /// Give a non-primitive blue value a stable FQN so the residual AST can
    /// reference it as a prebuilt constant. Idempotent per value.
    pub fn make_fqn_const(&mut self, value: &Value) -> Result<Fqn> {
        let key = value.cache_key();
        if let Some(fqn) = self.prebuilt.get(&key) {
            return Ok(fqn.clone());
        }
        let fqn = match value {
            Value::Func(func) => {
                if self.globals.contains_key(&func.fqn) {
                    func.fqn.clone()
                } else {
                    // a function not in the globals can only be the residual
                    // twin of one that is
                    debug_assert!(func.is_redshifted());
                    func.fqn.clone()
                }
            }
            Value::Type(ty) => {
                let fqn = ty.fqn().clone();
                if !self.globals.contains_key(&fqn) {
                    self.add_global(fqn.clone(), value.clone())?;
                }
                fqn
            }
            Value::Cell(cell) => cell.fqn.clone(),
            Value::Module(module) => module.fqn(),
            Value::Exception(exc) => {
                let base = exc.ty.fqn().join("prebuilt");
                let fqn = self.get_unique_fqn(&base);
                self.add_global(fqn.clone(), value.clone())?;
                fqn
            }
            other => {
                return Err(Error::spy(
                    ErrorKind::Wip,
                    format!("cannot create a prebuilt constant for {}", other),
                ))
            }
        };
        self.prebuilt.insert(key, fqn.clone());
        Ok(fqn)
    }

    // ==== types ====

    pub fn dynamic_type(&self, value: &Value) -> Ty {
        match value {
            Value::None => self.b.none_ty.clone(),
            Value::Bool(_) => self.b.bool.clone(),
            Value::I8(_) => self.b.i8.clone(),
            Value::I32(_) => self.b.i32.clone(),
            Value::F64(_) => self.b.f64.clone(),
            Value::Str(_) => self.b.str.clone(),
            Value::Tuple(_) => self.b.tuple_ty.clone(),
            Value::List(list) => list.ty.clone(),
            Value::Type(_) => self.b.type_ty.clone(),
            Value::Func(func) => func.functype.as_ty(),
            Value::Module(_) => self.b.module_ty.clone(),
            Value::Struct(s) => s.ty.clone(),
            Value::Lifted(l) => l.ty.clone(),
            Value::Ptr(p) => p.ty.clone(),
            Value::Exception(e) => e.ty.clone(),
            Value::Cell(cell) => self.dynamic_type(&cell.get()),
            Value::OpArg(_) => self.b.oparg_ty.clone(),
            Value::OpSpec(_) => self.b.opspec_ty.clone(),
            Value::OpImpl(_) => self.b.opimpl_ty.clone(),
        }
    }

    pub fn issubclass(&self, sub: &Ty, sup: &Ty) -> bool {
        // `object` is the root of every base chain, including types that do
        // not spell it out (function types, fresh instantiations)
        if matches!(sup.kind(), TyKind::Object) {
            return true;
        }
        sub.mro().any(|ty| &ty == sup)
    }

    /// The most precise common ancestor.
    pub fn union_type(&self, t1: &Ty, t2: &Ty) -> Ty {
        if self.issubclass(t1, t2) {
            return t2.clone();
        }
        if self.issubclass(t2, t1) {
            return t1.clone();
        }
        match t1.base() {
            Some(base) => self.union_type(base, t2),
            None => self.b.object.clone(),
        }
    }

    pub fn isinstance(&self, value: &Value, ty: &Ty) -> bool {
        self.issubclass(&self.dynamic_type(value), ty)
    }

    /// `list[item]`, memoized so the same instantiation is the same type.
    pub fn make_list_type(&mut self, item: &Ty) -> Ty {
        let fqn = Fqn::parse("builtins::list")
            .with_qualifiers(vec![Qualifier::value(item.human_name())]);
        if let Some(ty) = self.instantiations.get(&fqn) {
            return ty.clone();
        }
        let list_ty = Ty::declare(fqn.clone(), TyKind::List(item.clone()));

        let getitem = self.register_builtin(
            fqn.join("__getitem__"),
            FuncType::red(
                vec![
                    FuncParam::simple("l", list_ty.clone()),
                    FuncParam::simple("i", self.b.i32.clone()),
                ],
                item.clone(),
            ),
            false,
            |_vm, args| match (&args[0], &args[1]) {
                (Value::List(list), Value::I32(i)) => {
                    let items = list.items.lock().unwrap();
                    items.get(*i as usize).cloned().ok_or_else(|| {
                        Error::spy(
                            ErrorKind::Panic,
                            format!("list index out of bounds: {} (length {})", i, items.len()),
                        )
                    })
                }
                _ => Err(Error::spy(ErrorKind::Type, "list.__getitem__ type mismatch")),
            },
        );
        let setitem = self.register_builtin(
            fqn.join("__setitem__"),
            FuncType::red(
                vec![
                    FuncParam::simple("l", list_ty.clone()),
                    FuncParam::simple("i", self.b.i32.clone()),
                    FuncParam::simple("v", item.clone()),
                ],
                self.b.none_ty.clone(),
            ),
            false,
            |_vm, args| match (&args[0], &args[1]) {
                (Value::List(list), Value::I32(i)) => {
                    let mut items = list.items.lock().unwrap();
                    let len = items.len();
                    match items.get_mut(*i as usize) {
                        Some(slot) => {
                            *slot = args[2].clone();
                            Ok(Value::None)
                        }
                        None => Err(Error::spy(
                            ErrorKind::Panic,
                            format!("list index out of bounds: {} (length {})", i, len),
                        )),
                    }
                }
                _ => Err(Error::spy(ErrorKind::Type, "list.__setitem__ type mismatch")),
            },
        );
        let len = self.register_builtin(
            fqn.join("__len__"),
            FuncType::red(
                vec![FuncParam::simple("l", list_ty.clone())],
                self.b.i32.clone(),
            ),
            false,
            |_vm, args| match &args[0] {
                Value::List(list) => Ok(Value::I32(list.items.lock().unwrap().len() as i32)),
                _ => Err(Error::spy(ErrorKind::Type, "list.__len__ type mismatch")),
            },
        );

        list_ty.define(TyBody {
            base: Some(self.b.object.clone()),
            size: Some(8),
            dict: [
                ("__getitem__".to_string(), Value::Func(getitem)),
                ("__setitem__".to_string(), Value::Func(setitem)),
                ("__len__".to_string(), Value::Func(len)),
            ]
            .into_iter()
            .collect(),
            ..TyBody::default()
        });
        let _ = self.add_global(fqn.clone(), Value::Type(list_ty.clone()));
        self.instantiations.insert(fqn, list_ty.clone());
        list_ty
    }

    /// `ptr[pointee]`, memoized. The pointer type carries the field accessors
    /// and subscript operations, all bounds-checked through the heap.
    pub fn make_ptr_type(&mut self, pointee: &Ty) -> Ty {
        let fqn = Fqn::parse("unsafe::ptr")
            .with_qualifiers(vec![Qualifier::value(pointee.human_name())]);
        if let Some(ty) = self.instantiations.get(&fqn) {
            return ty.clone();
        }
        let ptr_ty = Ty::declare(fqn.clone(), TyKind::Ptr(pointee.clone()));

        let getitem = self.register_builtin(
            fqn.join("load"),
            FuncType::red(
                vec![
                    FuncParam::simple("p", ptr_ty.clone()),
                    FuncParam::simple("i", self.b.i32.clone()),
                ],
                pointee.clone(),
            ),
            false,
            |vm, args| match (&args[0], &args[1]) {
                (Value::Ptr(p), Value::I32(i)) => vm.heap.load(p, *i as i64),
                _ => Err(Error::spy(ErrorKind::Type, "ptr.load type mismatch")),
            },
        );
        let setitem = self.register_builtin(
            fqn.join("store"),
            FuncType::red(
                vec![
                    FuncParam::simple("p", ptr_ty.clone()),
                    FuncParam::simple("i", self.b.i32.clone()),
                    FuncParam::simple("v", pointee.clone()),
                ],
                self.b.none_ty.clone(),
            ),
            false,
            |vm, args| match (&args[0], &args[1]) {
                (Value::Ptr(p), Value::I32(i)) => {
                    let p = p.clone();
                    vm.heap.store(&p, *i as i64, args[2].clone())?;
                    Ok(Value::None)
                }
                _ => Err(Error::spy(ErrorKind::Type, "ptr.store type mismatch")),
            },
        );

        // field accessors resolve per call site, through metafunctions
        let oparg_ty = self.b.oparg_ty.clone();
        let opspec_ty = self.b.opspec_ty.clone();
        let getattr_meta = builtins::metafunc(
            fqn.join("__GETATTR__"),
            &oparg_ty,
            &opspec_ty,
            move |vm, args| {
                let name = args[1].blue_str()?.to_string();
                match vm.make_ptr_field_accessor(&args[0].static_ty, &name, false)? {
                    Some(func) => Ok(OpSpec::complex(func, vec![args[0].clone()])),
                    None => Ok(OpSpec::Null),
                }
            },
        );
        let setattr_meta = builtins::metafunc(
            fqn.join("__SETATTR__"),
            &oparg_ty,
            &opspec_ty,
            move |vm, args| {
                let name = args[1].blue_str()?.to_string();
                match vm.make_ptr_field_accessor(&args[0].static_ty, &name, true)? {
                    Some(func) => Ok(OpSpec::complex(
                        func,
                        vec![args[0].clone(), args[2].clone()],
                    )),
                    None => Ok(OpSpec::Null),
                }
            },
        );

        ptr_ty.define(TyBody {
            base: Some(self.b.object.clone()),
            size: Some(8),
            dict: [
                ("__getitem__".to_string(), Value::Func(getitem)),
                ("__setitem__".to_string(), Value::Func(setitem)),
                ("__GETATTR__".to_string(), Value::Func(getattr_meta)),
                ("__SETATTR__".to_string(), Value::Func(setattr_meta)),
            ]
            .into_iter()
            .collect(),
            ..TyBody::default()
        });
        let _ = self.add_global(fqn.clone(), Value::Type(ptr_ty.clone()));
        self.instantiations.insert(fqn, ptr_ty.clone());
        ptr_ty
    }

    /// `getfield`/`setfield` for one `(pointer type, field)` pair, created on
    /// demand and registered so the residual AST can call it by FQN.
    pub fn make_ptr_field_accessor(
        &mut self,
        ptr_ty: &Ty,
        field: &str,
        store: bool,
    ) -> Result<Option<Arc<WFunc>>> {
        let TyKind::Ptr(pointee) = ptr_ty.kind() else {
            return Ok(None);
        };
        let Some(field_def) = pointee.field(field) else {
            return Ok(None);
        };
        let field_ty = field_def.ty.clone();
        let name = if store {
            format!("__set_{}__", field)
        } else {
            format!("__get_{}__", field)
        };
        let fqn = ptr_ty.fqn().join(&name);
        if let Some(Value::Func(func)) = self.globals.get(&fqn) {
            return Ok(Some(func.clone()));
        }
        let field_name = field.to_string();
        let func = if store {
            self.register_builtin(
                fqn,
                FuncType::red(
                    vec![
                        FuncParam::simple("p", ptr_ty.clone()),
                        FuncParam::simple("v", field_ty),
                    ],
                    self.b.none_ty.clone(),
                ),
                false,
                move |vm, args| match &args[0] {
                    Value::Ptr(p) => {
                        let p = p.clone();
                        vm.heap.store_field(&p, &field_name, args[1].clone())?;
                        Ok(Value::None)
                    }
                    other => Err(Error::spy(
                        ErrorKind::Type,
                        format!("setfield applied to {}", other),
                    )),
                },
            )
        } else {
            self.register_builtin(
                fqn,
                FuncType::red(vec![FuncParam::simple("p", ptr_ty.clone())], field_ty),
                false,
                move |vm, args| match &args[0] {
                    Value::Ptr(p) => vm.heap.load_field(p, &field_name),
                    other => Err(Error::spy(
                        ErrorKind::Type,
                        format!("getfield applied to {}", other),
                    )),
                },
            )
        };
        Ok(Some(func))
    }

    /// The concrete allocator for one pointee type: `unsafe::gc_alloc[T]`.
    pub fn make_gc_alloc_func(&mut self, pointee: &Ty) -> Result<Arc<WFunc>> {
        let fqn = Fqn::parse("unsafe::gc_alloc")
            .with_qualifiers(vec![Qualifier::value(pointee.human_name())]);
        if let Some(Value::Func(func)) = self.globals.get(&fqn) {
            return Ok(func.clone());
        }
        let ptr_ty = self.make_ptr_type(pointee);
        let pointee = pointee.clone();
        let alloc_ptr_ty = ptr_ty.clone();
        let func = self.register_builtin(
            fqn,
            FuncType::red(
                vec![FuncParam::simple("n", self.b.i32.clone())],
                ptr_ty,
            ),
            false,
            move |vm, args| {
                let n = args[0].as_i32().unwrap_or(0);
                if n < 0 {
                    return Err(Error::spy(
                        ErrorKind::Panic,
                        format!("gc_alloc with negative length: {}", n),
                    ));
                }
                let init = vm.make_default(&pointee)?;
                let ptr = vm.heap.alloc(alloc_ptr_ty.clone(), n as usize, init);
                Ok(Value::Ptr(ptr))
            },
        );
        Ok(func)
    }

    /// The zero value of a type, used to initialize fresh allocations.
    pub fn make_default(&mut self, ty: &Ty) -> Result<Value> {
        if ty == &self.b.i32 {
            return Ok(Value::I32(0));
        }
        if ty == &self.b.i8 {
            return Ok(Value::I8(0));
        }
        if ty == &self.b.f64 {
            return Ok(Value::F64(0.0));
        }
        if ty == &self.b.bool {
            return Ok(Value::Bool(false));
        }
        if ty == &self.b.str {
            return Ok(Value::str(""));
        }
        if ty.is_struct() {
            let mut fields = Vec::new();
            for field in &ty.body().fields.clone() {
                fields.push((field.name.clone(), self.make_default(&field.ty)?));
            }
            return Ok(Value::Struct(Arc::new(WStruct {
                ty: ty.clone(),
                fields,
            })));
        }
        Err(Error::spy(
            ErrorKind::Wip,
            format!("no default value for type `{}`", ty.human_name()),
        ))
    }

    fn register_builtin(
        &mut self,
        fqn: Fqn,
        functype: FuncType,
        pure: bool,
        imp: impl Fn(&mut Vm, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Arc<WFunc> {
        let func = WFunc::builtin(fqn.clone(), functype, pure, Arc::new(imp));
        self.store_global(fqn, Value::Func(func.clone()));
        func
    }

    // ==== calling ====

    /// Call a function with positional arguments of already-checked types.
    /// Blue calls are memoized; re-entering the same blue call with the same
    /// arguments is a cycle and aborts with the blue call stack.
    pub fn fast_call(&mut self, func: &Arc<WFunc>, args: &[Value]) -> Result<Value> {
        if func.is_blue() {
            let key = BlueCache::key(&func.fqn, args);
            if let Some(cached) = self.bluecache.lookup(&key) {
                return Ok(cached);
            }
            if !self.bluecache.enter(key.clone()) {
                let mut err = SpyError::new(
                    ErrorKind::Static,
                    format!("cycle during blue evaluation of `{}`", func.fqn),
                );
                for fqn in self.blue_stack.iter().rev() {
                    err.add(Level::Note, format!("while evaluating `{}`", fqn), Span::fake());
                }
                return Err(err.into());
            }
            self.blue_stack.push(func.fqn.clone());
            let result = self.raw_call(func, args);
            self.blue_stack.pop();
            self.bluecache.leave(&key);
            let value = result?;
            self.bluecache.record(key, value.clone());
            Ok(value)
        } else {
            self.raw_call(func, args)
        }
    }

    fn raw_call(&mut self, func: &Arc<WFunc>, args: &[Value]) -> Result<Value> {
        debug!(fqn = %func.fqn, "call");
        match &func.body {
            crate::value::FuncBody::Builtin(imp) => {
                let imp = imp.clone();
                imp(self, args)
            }
            crate::value::FuncBody::Ast(astfunc) => {
                // if the function was redshifted in the meantime, run the
                // residual twin instead
                let func = if !astfunc.redshifted {
                    match self.lookup_global(&func.fqn) {
                        Some(Value::Func(newer)) if newer.is_redshifted() => newer,
                        _ => func.clone(),
                    }
                } else {
                    func.clone()
                };
                Frame::new(self, &func)?.run(args)
            }
        }
    }

    /// Call a metafunction with opargs, getting an [`OpSpec`] back.
    pub fn fast_metacall(&mut self, func: &Arc<WFunc>, args: &[OpArg]) -> Result<OpSpec> {
        let values: Vec<Value> = args
            .iter()
            .map(|arg| Value::OpArg(Arc::new(arg.clone())))
            .collect();
        match self.fast_call(func, &values)? {
            Value::OpSpec(spec) => Ok((*spec).clone()),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("metafunction `{}` returned {}", func.fqn, other),
            )),
        }
    }

    /// Run an OPERATOR over the given opargs, resolving one call site.
    ///
    /// Most operand values are hidden before dispatch (made red) so the
    /// OPERATOR specializes on types only; the receiver — and the attribute
    /// or method name, where there is one — stays blue, because dispatch
    /// legitimately depends on it.
    pub fn call_op(
        &mut self,
        span: Span,
        op: &Arc<WFunc>,
        args: Vec<OpArg>,
    ) -> Result<Arc<OpImpl>> {
        let ops = &self.b.ops;
        let keep_first = [
            &ops.call,
            &ops.call_method,
            &ops.getattr,
            &ops.setattr,
            &ops.getitem,
            &ops.setitem,
            &ops.raise_,
        ]
        .iter()
        .any(|h| Arc::ptr_eq(h, op));
        let keep_second = [&ops.getattr, &ops.setattr, &ops.call_method]
            .iter()
            .any(|h| Arc::ptr_eq(h, op));
        // generic instantiation sites (`list[i32]`, `Matrix[i32, 2, 3]`,
        // `Point(...)`, `TypeError("...")`) specialize on argument *values*
        // by design, so everything stays as-is there
        let generic_site = (Arc::ptr_eq(op, &ops.call) || Arc::ptr_eq(op, &ops.getitem))
            && args.first().is_some_and(|a| {
                a.is_blue()
                    && match a.value() {
                        Value::Type(_) => true,
                        Value::Func(func) => {
                            func.kind() == FuncKind::Generic || func.is_blue()
                        }
                        _ => false,
                    }
            });

        let mut dispatch_args: Vec<OpArg> = if generic_site {
            args.clone()
        } else {
            args.iter().map(OpArg::as_red).collect()
        };
        if keep_first && !args.is_empty() {
            dispatch_args[0] = args[0].clone();
        }
        if keep_second && args.len() > 1 {
            dispatch_args[1] = args[1].clone();
        }

        let values: Vec<Value> = dispatch_args
            .into_iter()
            .map(|arg| Value::OpArg(Arc::new(arg)))
            .collect();
        let result = self
            .fast_call(op, &values)
            .map_err(|err| err.note(format!("`{}` called here", op.fqn), span))?;
        match result {
            Value::OpImpl(opimpl) => Ok(opimpl),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("OPERATOR `{}` returned {}", op.fqn, other),
            )),
        }
    }

    pub(crate) fn enter_redshift(&mut self, fqn: &Fqn) -> bool {
        self.redshift_in_progress.insert(fqn.clone())
    }

    pub(crate) fn leave_redshift(&mut self, fqn: &Fqn) {
        self.redshift_in_progress.remove(fqn);
    }

    /// Analyze and execute a source module, registering its globals.
    pub fn import_module(
        &mut self,
        module_ast: spy_core::ast::Module,
        modname: &str,
    ) -> Result<Arc<WModule>> {
        crate::modframe::run_module(self, module_ast, modname)
    }

    // ==== redshift driver ====

    /// Redshift every red AST function reachable from the globals, replacing
    /// each with its residual form. Blue evaluation can mint new globals, so
    /// iterate until a fixed point.
    pub fn redshift_all(&mut self, error_mode: ErrorMode) -> Result<()> {
        loop {
            let pending: Vec<(Fqn, Arc<WFunc>)> = self
                .globals
                .iter()
                .filter_map(|(fqn, value)| match value {
                    Value::Func(func) => match func.as_astfunc() {
                        Some(ast) if !ast.redshifted && func.color() == Color::Red => {
                            Some((fqn.clone(), func.clone()))
                        }
                        _ => None,
                    },
                    _ => None,
                })
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            for (fqn, func) in pending {
                debug!(%fqn, "redshift");
                let residual = doppler::redshift(self, &func, error_mode)?;
                self.store_global(fqn, Value::Func(residual));
            }
        }
    }

    /// All redshifted functions, in registration order; what the C emitter
    /// consumes.
    pub fn redshifted_funcs(&self) -> Vec<Arc<WFunc>> {
        self.globals
            .values()
            .filter_map(|value| match value {
                Value::Func(func) if func.is_redshifted() => Some(func.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether two values are equal under universal equality: values of
    /// unrelated types are simply unequal, never a type error.
    pub fn universal_eq(&self, a: &Value, b: &Value) -> bool {
        a.cache_key() == b.cache_key()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("globals", &self.globals.len())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
