//! Memoization of blue function calls.
//!
//! Results of blue calls are recorded per `(function, argument keys)` and
//! replayed on later calls: this is what makes `make_fn(f64)` return the
//! *same* function value twice, and it is the sole monomorphization
//! mechanism — generic instantiation is just a memoized blue call.
//!
//! The in-progress set guards against cycles: re-entering the same key
//! before the first call finished means blue evaluation will never
//! terminate, which is reported as a static error rather than a stack
//! overflow.

use std::collections::{HashMap, HashSet};

use spy_core::fqn::Fqn;

use crate::value::{Value, ValueKey};

pub type CallKey = (Fqn, Vec<ValueKey>);

#[derive(Debug, Default)]
pub struct BlueCache {
    data: HashMap<CallKey, Value>,
    in_progress: HashSet<CallKey>,
}

impl BlueCache {
    pub fn new() -> BlueCache {
        BlueCache::default()
    }

    pub fn key(func_fqn: &Fqn, args: &[Value]) -> CallKey {
        (
            func_fqn.clone(),
            args.iter().map(Value::cache_key).collect(),
        )
    }

    pub fn lookup(&self, key: &CallKey) -> Option<Value> {
        self.data.get(key).cloned()
    }

    pub fn record(&mut self, key: CallKey, result: Value) {
        self.data.insert(key, result);
    }

    /// Returns false if the key is already being evaluated (a cycle).
    pub fn enter(&mut self, key: CallKey) -> bool {
        self.in_progress.insert(key)
    }

    pub fn leave(&mut self, key: &CallKey) {
        self.in_progress.remove(key);
    }
}
