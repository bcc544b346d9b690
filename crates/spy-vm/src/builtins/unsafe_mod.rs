//! The `unsafe` module: heap allocation and typed pointers.
//!
//! `gc_alloc` is a generic blue function: `gc_alloc(T)` yields the concrete
//! allocator `unsafe::gc_alloc[T]`, whose calls survive into the residual
//! program. The "GC" is a no-op allocator; see [`crate::heap`].

use std::sync::Arc;

use spy_core::ast::{Color, FuncKind};
use spy_core::error::{Error, ErrorKind, Result};
use spy_core::fqn::Fqn;

use crate::module::ModuleRegistry;
use crate::value::{FuncParam, FuncType, Ty, Value, WFunc};
use crate::vm::Vm;

pub fn register(type_ty: &Ty, object: &Ty) -> (ModuleRegistry, Arc<WFunc>) {
    let mut reg = ModuleRegistry::new("unsafe");

    let functype = FuncType::new(
        vec![FuncParam::simple("T", type_ty.clone())],
        object.clone(),
        Color::Blue,
        FuncKind::Generic,
    );
    let gc_alloc = WFunc::builtin(
        Fqn::parse("unsafe::gc_alloc"),
        functype,
        false,
        Arc::new(|vm: &mut Vm, args: &[Value]| match &args[0] {
            Value::Type(ty) => vm.make_gc_alloc_func(ty).map(Value::Func),
            other => Err(Error::spy(
                ErrorKind::Type,
                format!("gc_alloc expects a type, got {}", other),
            )),
        }),
    );
    reg.add("gc_alloc", Value::Func(gc_alloc.clone()));
    (reg, gc_alloc)
}
