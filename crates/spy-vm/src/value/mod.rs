//! The object model: every value the VM manipulates is a [`Value`].
//!
//! A value carries its payload; its *dynamic type* is computed by
//! [`Vm::dynamic_type`](crate::vm::Vm::dynamic_type) and never changes.
//! Values are immutable at the value level: strings and structs cannot be
//! mutated in place, mutation happens through pointers (heap cells) and
//! module cells.

pub mod func;
pub mod str;
pub mod ty;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spy_core::ast::Color;
use spy_core::error::{Annotation, ErrorKind};
use spy_core::fqn::Fqn;

pub use self::func::{AstFunc, BuiltinImpl, FuncBody, FuncParam, FuncType, WFunc};
pub use self::str::WStr;
pub use self::ty::{StructField, Ty, TyBody, TyData, TyKind};

use crate::module::WModule;
use crate::opimpl::OpImpl;
use crate::opspec::{OpArg, OpSpec};

/// A mutable name→value map shared between a frame and the closures created
/// inside it.
pub type Namespace = Arc<Mutex<HashMap<String, Value>>>;

pub fn new_namespace() -> Namespace {
    Arc::new(Mutex::new(HashMap::new()))
}

/// A by-value struct instance. Immutable: "mutating" a field builds a new
/// instance, and in-place mutation is only possible through a pointer.
#[derive(Debug, Clone)]
pub struct WStruct {
    pub ty: Ty,
    pub fields: Vec<(String, Value)>,
}

impl WStruct {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// An instance of a lifted type: the user-facing wrapper around a low-level
/// value.
#[derive(Debug, Clone)]
pub struct WLifted {
    pub ty: Ty,
    pub ll: Value,
}

/// An app-level exception value. Not a Rust error by itself: raising wraps it
/// into [`spy_core::error::SpyError`].
#[derive(Debug, Clone)]
pub struct WException {
    pub ty: Ty,
    pub message: String,
    pub annotations: Vec<Annotation>,
}

impl WException {
    pub fn kind(&self) -> ErrorKind {
        match self.ty.fqn().attr.as_str() {
            "StaticError" => ErrorKind::Static,
            "TypeError" => ErrorKind::Type,
            "ValueError" => ErrorKind::Value,
            "IndexError" => ErrorKind::Index,
            "NameError" => ErrorKind::Name,
            "PanicError" => ErrorKind::Panic,
            _ => ErrorKind::Exception,
        }
    }
}

/// A module-level mutable variable, promoted to a VM global so that writes
/// are visible to every frame.
#[derive(Debug)]
pub struct WCell {
    pub fqn: Fqn,
    value: Mutex<Value>,
}

impl WCell {
    pub fn new(fqn: Fqn, value: Value) -> Arc<WCell> {
        Arc::new(WCell {
            fqn,
            value: Mutex::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.value.lock().unwrap().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.lock().unwrap() = value;
    }
}

/// A typed, growable sequence. Lists are reference values.
#[derive(Debug)]
pub struct WList {
    pub ty: Ty,
    pub items: Mutex<Vec<Value>>,
}

/// A checked pointer: a heap handle plus a length, so that every access can
/// be bounds-checked. The release build of emitted code strips the length;
/// the interpreter always keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WPtr {
    /// Type of the pointee.
    pub ty: Ty,
    pub heap_id: usize,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    I8(i8),
    I32(i32),
    F64(f64),
    Str(WStr),
    Tuple(Arc<Vec<Value>>),
    List(Arc<WList>),
    Type(Ty),
    Func(Arc<WFunc>),
    Module(Arc<WModule>),
    Struct(Arc<WStruct>),
    Lifted(Arc<WLifted>),
    Ptr(WPtr),
    Exception(Arc<WException>),
    Cell(Arc<WCell>),
    OpArg(Arc<OpArg>),
    OpSpec(Arc<OpSpec>),
    OpImpl(Arc<OpImpl>),
}

impl Value {
    pub fn str(s: impl Into<WStr>) -> Value {
        Value::Str(s.into())
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn exception(ty: Ty, message: impl Into<String>) -> Value {
        Value::Exception(Arc::new(WException {
            ty,
            message: message.into(),
            annotations: Vec::new(),
        }))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&WStr> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Ty> {
        match self {
            Value::Type(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Arc<WFunc>> {
        match self {
            Value::Func(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_oparg(&self) -> Option<&Arc<OpArg>> {
        match self {
            Value::OpArg(arg) => Some(arg),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::I8(x) => write!(f, "{}", x),
            Value::I32(x) => write!(f, "{}", x),
            Value::F64(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::List(list) => {
                let items = list.items.lock().unwrap();
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Type(ty) => write!(f, "<type {}>", ty.human_name()),
            Value::Func(func) => write!(f, "{}", func),
            Value::Module(module) => write!(f, "<module {}>", module.name),
            Value::Struct(s) => {
                write!(f, "{}(", s.ty.fqn().attr)?;
                for (i, (name, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", name, value)?;
                }
                write!(f, ")")
            }
            Value::Lifted(l) => write!(f, "<{} {}>", l.ty.fqn().attr, l.ll),
            Value::Ptr(p) => write!(f, "<ptr[{}] 0x{:x}/{}>", p.ty, p.heap_id, p.length),
            Value::Exception(e) => write!(f, "{}({:?})", e.ty.fqn().attr, e.message),
            Value::Cell(c) => write!(f, "<cell {}>", c.fqn),
            Value::OpArg(arg) => write!(f, "{}", arg),
            Value::OpSpec(spec) => write!(f, "{}", spec),
            Value::OpImpl(imp) => write!(f, "{}", imp),
        }
    }
}

/// A hashable key describing a value, used by the blue cache and by
/// `make_fqn_const` deduplication. Follows universal-equality semantics: two
/// values of unrelated types simply get different keys. Reference values
/// (lists, cells) are keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    None,
    Bool(bool),
    I8(i8),
    I32(i32),
    F64(u64),
    Str(WStr),
    Tuple(Vec<ValueKey>),
    /// Types, functions, modules and cells, keyed by their FQN.
    Fqn(Fqn),
    Struct(Fqn, Vec<ValueKey>),
    Lifted(Fqn, Box<ValueKey>),
    Ptr(usize),
    Exception(Fqn, String),
    OpArg {
        color: Color,
        ty: Fqn,
        val: Option<Box<ValueKey>>,
    },
    Identity(usize),
}

impl Value {
    /// Red opargs compare by static type only; blue ones also by value.
    pub fn cache_key(&self) -> ValueKey {
        match self {
            Value::None => ValueKey::None,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::I8(x) => ValueKey::I8(*x),
            Value::I32(x) => ValueKey::I32(*x),
            Value::F64(x) => ValueKey::F64(x.to_bits()),
            Value::Str(s) => ValueKey::Str(s.clone()),
            Value::Tuple(items) => ValueKey::Tuple(items.iter().map(Value::cache_key).collect()),
            Value::Type(ty) => ValueKey::Fqn(ty.fqn().clone()),
            Value::Func(func) => ValueKey::Fqn(func.fqn.clone()),
            Value::Module(module) => ValueKey::Fqn(Fqn::module(module.name.clone())),
            Value::Cell(cell) => ValueKey::Fqn(cell.fqn.clone()),
            Value::Struct(s) => ValueKey::Struct(
                s.ty.fqn().clone(),
                s.fields.iter().map(|(_, v)| v.cache_key()).collect(),
            ),
            Value::Lifted(l) => {
                ValueKey::Lifted(l.ty.fqn().clone(), Box::new(l.ll.cache_key()))
            }
            Value::Ptr(p) => ValueKey::Ptr(p.heap_id),
            Value::Exception(e) => ValueKey::Exception(e.ty.fqn().clone(), e.message.clone()),
            Value::OpArg(arg) => ValueKey::OpArg {
                color: arg.color,
                ty: arg.static_ty.fqn().clone(),
                val: if arg.color == Color::Blue {
                    arg.val.as_ref().map(|v| Box::new(v.cache_key()))
                } else {
                    None
                },
            },
            Value::List(list) => ValueKey::Identity(Arc::as_ptr(list) as usize),
            Value::OpSpec(spec) => ValueKey::Identity(Arc::as_ptr(spec) as usize),
            Value::OpImpl(imp) => ValueKey::Identity(Arc::as_ptr(imp) as usize),
        }
    }
}
