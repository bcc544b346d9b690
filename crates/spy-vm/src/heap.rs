//! The VM heap backing `gc_alloc`.
//!
//! The "GC" is a no-op allocator that may later be replaced: allocations
//! live for the lifetime of the VM, there is no freeing, no pinning and no
//! object movement. Every access is bounds-checked (the interpreter always
//! runs in checked mode; only emitted release builds use bare pointers).

use spy_core::error::{Error, ErrorKind, Result};

use crate::value::{Value, WPtr};

#[derive(Debug, Default)]
pub struct Heap {
    cells: Vec<Vec<Value>>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Allocate `n` copies of `init` and hand out a checked pointer.
    pub fn alloc(&mut self, ty: crate::value::Ty, n: usize, init: Value) -> WPtr {
        let heap_id = self.cells.len();
        self.cells.push(vec![init; n]);
        WPtr {
            ty,
            heap_id,
            length: n,
        }
    }

    fn check(&self, ptr: &WPtr, i: i64) -> Result<usize> {
        if i < 0 || i as usize >= ptr.length {
            return Err(Error::spy(
                ErrorKind::Panic,
                format!(
                    "pointer access out of bounds: index {} (length {})",
                    i, ptr.length
                ),
            ));
        }
        Ok(i as usize)
    }

    pub fn load(&self, ptr: &WPtr, i: i64) -> Result<Value> {
        let i = self.check(ptr, i)?;
        Ok(self.cells[ptr.heap_id][i].clone())
    }

    pub fn store(&mut self, ptr: &WPtr, i: i64, value: Value) -> Result<()> {
        let i = self.check(ptr, i)?;
        self.cells[ptr.heap_id][i] = value;
        Ok(())
    }

    /// Read one field of the struct the pointer points at.
    pub fn load_field(&self, ptr: &WPtr, name: &str) -> Result<Value> {
        let cell = self.load(ptr, 0)?;
        match cell {
            Value::Struct(s) => s.field(name).cloned().ok_or_else(|| {
                Error::spy(
                    ErrorKind::Panic,
                    format!("struct `{}` has no field `{}`", s.ty, name),
                )
            }),
            other => Err(Error::spy(
                ErrorKind::Panic,
                format!("pointer target is not a struct: {}", other),
            )),
        }
    }

    /// Write one field of the struct the pointer points at.
    pub fn store_field(&mut self, ptr: &WPtr, name: &str, value: Value) -> Result<()> {
        let _ = self.check(ptr, 0)?;
        let cell = &mut self.cells[ptr.heap_id][0];
        match cell {
            Value::Struct(s) => {
                let mut new = (**s).clone();
                match new.fields.iter_mut().find(|(n, _)| n == name) {
                    Some((_, slot)) => *slot = value,
                    None => {
                        return Err(Error::spy(
                            ErrorKind::Panic,
                            format!("struct `{}` has no field `{}`", new.ty, name),
                        ))
                    }
                }
                *cell = Value::Struct(std::sync::Arc::new(new));
                Ok(())
            }
            other => Err(Error::spy(
                ErrorKind::Panic,
                format!("pointer target is not a struct: {}", other),
            )),
        }
    }
}
