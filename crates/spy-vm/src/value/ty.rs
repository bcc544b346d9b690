//! Types are values.
//!
//! A [`Ty`] is a shared handle to type data: identity is the FQN, and two
//! handles compare equal iff their FQNs do. A type carries a `kind` tag, a
//! capability table (the `__add__`/`__GETATTR__`-style entries consulted by
//! operator dispatch), an optional base type (exceptions form a chain
//! `TypeError < StaticError < Exception`), a field layout for structs and a
//! size hint.
//!
//! Types are defined in two phases: `declare` creates the handle (so that a
//! struct can reference itself), `define` fills in the body. Reading the body
//! of an undefined type is a bug.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use spy_core::ast::Color;
use spy_core::fqn::Fqn;

use super::func::FuncType;
use super::Value;

#[derive(Debug, Clone)]
pub enum TyKind {
    /// i32, f64, i8, bool, str, NoneType.
    Primitive,
    /// The type of types.
    Type,
    /// The type of modules.
    Module,
    /// A function type; one `Ty` per signature.
    Func(FuncType),
    /// A by-value aggregate with named fields.
    Struct,
    /// A user-facing type paired with a low-level representation via
    /// `__lift__`/`__unlift__`.
    Lifted,
    /// A checked pointer to values of the payload type.
    Ptr(Ty),
    /// `list[T]`.
    List(Ty),
    Tuple,
    Exception,
    /// The protocol types used by operator dispatch.
    OpArg,
    OpSpec,
    OpImpl,
    /// The root of the base chain.
    Object,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: Ty,
    pub offset: u32,
}

/// The defined part of a type.
#[derive(Debug, Default)]
pub struct TyBody {
    pub base: Option<Ty>,
    pub size: Option<u32>,
    /// Capability table: `__new__`, `__getitem__`, `__GETATTR__`, methods...
    /// Upper-case entries are metafunctions, lower-case ones plain functions.
    pub dict: HashMap<String, Value>,
    /// Field layout, for structs.
    pub fields: Vec<StructField>,
    /// The low-level representation, for lifted types.
    pub ll_ty: Option<Ty>,
}

#[derive(Debug)]
pub struct TyData {
    pub fqn: Fqn,
    pub kind: TyKind,
    body: OnceCell<TyBody>,
}

#[derive(Clone)]
pub struct Ty(Arc<TyData>);

// shallow on purpose: a struct type's capability table holds functions whose
// signatures mention the type itself
impl std::fmt::Debug for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ty({})", self.fqn())
    }
}

impl Ty {
    /// Create and immediately define a type.
    pub fn new(fqn: Fqn, kind: TyKind, body: TyBody) -> Ty {
        let ty = Ty::declare(fqn, kind);
        ty.define(body);
        ty
    }

    /// Forward-declare a type; the body comes later via [`define`](Ty::define).
    pub fn declare(fqn: Fqn, kind: TyKind) -> Ty {
        Ty(Arc::new(TyData {
            fqn,
            kind,
            body: OnceCell::new(),
        }))
    }

    pub fn define(&self, body: TyBody) {
        self.0
            .body
            .set(body)
            .unwrap_or_else(|_| panic!("type `{}` defined twice", self.fqn()));
    }

    pub fn is_defined(&self) -> bool {
        self.0.body.get().is_some()
    }

    pub fn fqn(&self) -> &Fqn {
        &self.0.fqn
    }

    pub fn kind(&self) -> &TyKind {
        &self.0.kind
    }

    pub fn body(&self) -> &TyBody {
        self.0
            .body
            .get()
            .unwrap_or_else(|| panic!("type `{}` used before definition", self.fqn()))
    }

    pub fn base(&self) -> Option<&Ty> {
        self.body().base.as_ref()
    }

    pub fn size(&self) -> Option<u32> {
        self.body().size
    }

    pub fn human_name(&self) -> String {
        self.fqn().human_name()
    }

    /// Look `name` up in the capability table, walking the base chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.body().dict.get(name) {
            return Some(value.clone());
        }
        self.base().and_then(|base| base.lookup(name))
    }

    /// Like [`lookup`](Ty::lookup), but only if the entry is a function.
    pub fn lookup_func(&self, name: &str) -> Option<Arc<super::func::WFunc>> {
        match self.lookup(name) {
            Some(Value::Func(func)) => Some(func),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        // only structs have fields, so body() is safe here
        self.body().fields.iter().find(|f| f.name == name)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind(), TyKind::Struct)
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.kind(), TyKind::Exception)
    }

    pub fn as_functype(&self) -> Option<&FuncType> {
        match self.kind() {
            TyKind::Func(functype) => Some(functype),
            _ => None,
        }
    }

    /// Types whose values are shared references rather than by-value data.
    /// Equality between two such values can fall back to identity.
    pub fn is_reference_type(&self) -> bool {
        matches!(
            self.kind(),
            TyKind::Exception | TyKind::List(_) | TyKind::Module | TyKind::Func(_)
        )
    }

    /// Walk the base chain, self first.
    pub fn mro(&self) -> impl Iterator<Item = Ty> {
        std::iter::successors(Some(self.clone()), |ty| ty.base().cloned())
    }
}

impl PartialEq for Ty {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.fqn() == other.fqn()
    }
}

impl Eq for Ty {}

impl std::hash::Hash for Ty {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fqn().hash(state);
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.human_name())
    }
}

impl FuncType {
    /// The `Ty` describing functions of this signature. The FQN is the
    /// canonical signature string, so identical signatures compare equal.
    pub fn as_ty(&self) -> Ty {
        let mut sig = String::new();
        if self.color == Color::Blue {
            sig.push_str("@blue ");
        }
        sig.push_str("def(");
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                sig.push_str(", ");
            }
            if param.variadic {
                sig.push('*');
            }
            sig.push_str(&param.ty.human_name());
        }
        sig.push_str(") -> ");
        sig.push_str(&self.restype.human_name());
        Ty::new(
            Fqn::new("builtins", sig),
            TyKind::Func(self.clone()),
            TyBody::default(),
        )
    }
}
