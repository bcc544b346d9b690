//! Immutable, hashable strings.
//!
//! The semantics mirror the runtime library exactly, so that interp mode and
//! compiled code agree: concatenation allocates, repetition with a
//! non-positive count yields the empty string, one-byte indexing wraps
//! negative indices and panics out of bounds, and the hash is 32-bit FNV-1a,
//! adjusted to never return 0 or -1.

use std::sync::Arc;

use spy_core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WStr(Arc<str>);

impl WStr {
    pub fn new(s: impl Into<Arc<str>>) -> WStr {
        WStr(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> i32 {
        self.0.len() as i32
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn concat(&self, other: &WStr) -> WStr {
        WStr::new(format!("{}{}", self.0, other.0))
    }

    pub fn repeat(&self, n: i32) -> WStr {
        if n <= 0 {
            WStr::new("")
        } else {
            WStr::new(self.0.repeat(n as usize))
        }
    }

    /// One-byte slice. A negative index wraps around once; going out of
    /// bounds is a panic, like in the runtime library.
    pub fn getitem(&self, i: i32) -> Result<WStr> {
        let len = self.len();
        let idx = if i < 0 { i + len } else { i };
        if idx < 0 || idx >= len {
            return Err(Error::spy(
                ErrorKind::Panic,
                format!("string index out of bounds: {} (length {})", i, len),
            ));
        }
        let idx = idx as usize;
        Ok(WStr::new(&self.0[idx..idx + 1]))
    }

    /// 32-bit FNV-1a over the UTF-8 bytes. 0 and -1 are reserved (the
    /// runtime uses them as "not yet hashed" markers), so they are remapped.
    pub fn hash(&self) -> i32 {
        const FNV_OFFSET: u32 = 0x811c9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;
        let mut h = FNV_OFFSET;
        for byte in self.0.as_bytes() {
            h ^= *byte as u32;
            h = h.wrapping_mul(FNV_PRIME);
        }
        match h {
            0 => 1,
            u32::MAX => i32::MAX,
            _ => h as i32,
        }
    }
}

impl std::fmt::Display for WStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WStr {
    fn from(s: &str) -> WStr {
        WStr::new(s)
    }
}

impl From<String> for WStr {
    fn from(s: String) -> WStr {
        WStr::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_and_repeat() {
        let a = WStr::from("foo");
        let b = WStr::from("bar");
        assert_eq!(a.concat(&b).as_str(), "foobar");
        assert_eq!(a.repeat(3).as_str(), "foofoofoo");
        assert_eq!(a.repeat(0).as_str(), "");
        assert_eq!(a.repeat(-2).as_str(), "");
    }

    #[test]
    fn getitem_wraps_and_panics() {
        let s = WStr::from("abc");
        assert_eq!(s.getitem(0).unwrap().as_str(), "a");
        assert_eq!(s.getitem(-1).unwrap().as_str(), "c");
        assert!(s.getitem(3).is_err());
        assert!(s.getitem(-4).is_err());
    }

    #[test]
    fn hash_is_stable_and_never_reserved() {
        let a = WStr::from("hello");
        let b = WStr::from("hello");
        assert_eq!(a.hash(), b.hash());
        for s in ["", "a", "hello world", "\u{1f600}"] {
            let h = WStr::from(s).hash();
            assert_ne!(h, 0);
            assert_ne!(h, -1);
        }
    }
}
