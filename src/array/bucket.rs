//! A single array entry (spec §3.8: "bucket is `{value, hash_or_index,
//! key_ptr_or_null}`").
//!
//! `Key` replaces the original's packed `hash_or_index` + `key_ptr` pair
//! with an explicit two-variant enum: nothing outside the allocator reads
//! a bucket's raw bytes, so there is no reason to keep the union shape
//! once it is safe Rust.

use crate::value::{Aux, Value, AUX_INVALID};
use crate::zstring::{as_canonical_integer_key, ZString, ZStringRef};

pub const INVALID_INDEX: u32 = u32::MAX;

#[derive(Clone)]
pub enum Key {
    Int(i64),
    Str(ZStringRef),
}

impl Key {
    /// The one place a key is minted from raw bytes: a string that reads as
    /// a canonical decimal integer becomes an integer key instead (spec:
    /// "All operations treat numeric strings as integer keys"). Callers
    /// that already hold a non-numeric `ZStringRef` they know will never
    /// match (e.g. a proptable's deliberately-all-string keys) can still
    /// build `Key::Str` directly.
    pub fn new_str(bytes: &[u8]) -> Key {
        match as_canonical_integer_key(bytes) {
            Some(i) => Key::Int(i),
            None => Key::Str(ZStringRef::new(ZString::new(bytes))),
        }
    }

    /// As `new_str`, for a caller that already holds a `ZStringRef` (so an
    /// interned or shared string isn't needlessly re-copied when it turns
    /// out not to be numeric).
    pub fn from_zstring(s: ZStringRef) -> Key {
        match as_canonical_integer_key(s.as_bytes()) {
            Some(i) => Key::Int(i),
            None => Key::Str(s),
        }
    }

    /// The value used both to compute a hashed bucket's chain slot and,
    /// for lookups, to identify the bucket when walking that chain.
    #[inline]
    pub fn chain_hash(&self) -> u64 {
        match self {
            Key::Int(i) => *i as u64,
            Key::Str(s) => s.hash(),
        }
    }

    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Key::Int(_))
    }

    pub fn matches(&self, other: &Key) -> bool {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Str(a), Key::Str(b)) => a.bytes_eq(b),
            _ => false,
        }
    }
}

pub struct Bucket {
    pub value: Value,
    pub key: Key,
}

impl Bucket {
    pub fn new(key: Key, mut value: Value) -> Bucket {
        value.aux = Aux::NextChain(INVALID_INDEX);
        Bucket { value, key }
    }

    pub fn tombstone(key: Key) -> Bucket {
        Bucket { value: Value { aux: Aux::NextChain(INVALID_INDEX), ..Value::undef() }, key }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !self.value.is_undef()
    }

    #[inline]
    pub fn is_effectively_live(&self) -> bool {
        !self.value.is_effectively_undef()
    }

    /// Collision-chain link: index of the next bucket hashing to the same
    /// slot, or `INVALID_INDEX` at the chain's end. Spec §4.7.3/§4.7.7:
    /// "collision chains thread through the `u2.next` slot of each
    /// bucket's value cell" — here, `Value::aux`'s `NextChain` variant
    /// (SPEC_FULL.md §3.1).
    #[inline]
    pub fn next(&self) -> u32 {
        match self.value.aux {
            Aux::NextChain(n) => n,
            _ => INVALID_INDEX,
        }
    }

    #[inline]
    pub fn set_next(&mut self, next: u32) {
        self.value.aux = Aux::NextChain(next);
    }
}

impl Default for Bucket {
    fn default() -> Bucket {
        Bucket { value: Value { kind: crate::value::ValueKind::Undef, aux: Aux::NextChain(AUX_INVALID) }, key: Key::Int(0) }
    }
}
