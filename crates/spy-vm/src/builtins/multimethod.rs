//! Poor man's multimethods for the primitive operators.
//!
//! A flat table keyed by `(token, left type, right type)` with precise
//! lookups. Partial registrations leave one side `None`; lookup tries the
//! precise key first, then the two partial ones, left before right. This is
//! the tie-break order of the whole dispatch machinery: exact match beats
//! partial, left beats right.

use std::collections::HashMap;
use std::sync::Arc;

use spy_core::fqn::Fqn;

use crate::opspec::OpSpec;
use crate::value::{Ty, WFunc};

type Key = (&'static str, Option<Fqn>, Option<Fqn>);

#[derive(Debug, Default)]
pub struct MultiMethodTable {
    impls: HashMap<Key, Arc<WFunc>>,
}

impl MultiMethodTable {
    pub fn new() -> MultiMethodTable {
        MultiMethodTable::default()
    }

    pub fn register(&mut self, token: &'static str, lty: &Ty, rty: &Ty, func: &Arc<WFunc>) {
        let key = (token, Some(lty.fqn().clone()), Some(rty.fqn().clone()));
        debug_assert!(!self.impls.contains_key(&key));
        self.impls.insert(key, func.clone());
    }

    pub fn register_unary(&mut self, token: &'static str, ty: &Ty, func: &Arc<WFunc>) {
        let key = (token, Some(ty.fqn().clone()), None);
        debug_assert!(!self.impls.contains_key(&key));
        self.impls.insert(key, func.clone());
    }

    pub fn lookup(&self, token: &'static str, lty: &Ty, rty: &Ty) -> Option<OpSpec> {
        let l = Some(lty.fqn().clone());
        let r = Some(rty.fqn().clone());
        let keys = [
            (token, l.clone(), r.clone()),
            (token, l, None),
            (token, None, r),
        ];
        keys.iter()
            .find_map(|key| self.impls.get(key))
            .map(|func| OpSpec::simple(func.clone()))
    }

    pub fn lookup_unary(&self, token: &'static str, ty: &Ty) -> Option<OpSpec> {
        self.impls
            .get(&(token, Some(ty.fqn().clone()), None))
            .map(|func| OpSpec::simple(func.clone()))
    }

    /// Precise lookup returning the bare function; used by the conversion
    /// table, where the "operands" are source and destination types.
    pub fn lookup_func(&self, token: &'static str, lty: &Ty, rty: &Ty) -> Option<Arc<WFunc>> {
        self.impls
            .get(&(token, Some(lty.fqn().clone()), Some(rty.fqn().clone())))
            .cloned()
    }
}
