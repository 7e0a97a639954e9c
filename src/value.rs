//! The tagged value cell (external collaborator, spec §3.1).
//!
//! The array engine (`array/`) is this type's one in-tree consumer: a
//! bucket's value carries its collision-chain link in `Value::aux`, the
//! same scratch word `zend_types.h`'s `u2` union overlays for "next index
//! in a hash collision chain", "iterator cursor for foreach", and
//! "constant cache slot id" (spec §3.1). SPEC_FULL.md §3.1 models those
//! three concrete uses as named `Aux` variants instead of a bare `u32`, so
//! a reader can tell which use is live at a cell without re-deriving it
//! from context the way the original union requires.

use crate::zstring::ZStringRef;
use std::rc::Rc;

/// `zend_types.h`'s `u2` auxiliary word (spec §3.1), as a sum type instead
/// of an untagged union — only one of these is ever meaningful for a given
/// cell, decided by whichever subsystem is holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aux {
    /// No scratch use is live for this cell.
    None,
    /// Index of the next bucket hashing to the same collision-chain slot
    /// (array engine, spec §4.7.3), or `INVALID_INDEX` at the chain's end.
    NextChain(u32),
    /// A `foreach` cursor position into an array.
    ForeachPos(u32),
    /// A cache slot id for a compiled constant.
    ConstantCacheSlot(u32),
    /// A registered resource type id (`resource.rs`) — spec §3.1's "etc."
    /// beyond the three named uses above; the resource registry is this
    /// crate's own client of the same scratch word.
    ResourceType(u32),
}

impl Default for Aux {
    fn default() -> Aux {
        Aux::None
    }
}

/// Sentinel for a `NextChain`/`ForeachPos` payload that carries no chain/
/// iterator meaning (end of chain, no cursor).
pub const AUX_INVALID: u32 = u32::MAX;

/// Common 8-byte header every refcounted payload carries (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefHeader {
    pub refcount: u32,
    pub type_tag: u8,
    pub flags: u8,
    pub gc_info: u16,
}

/// Opaque refcounted payload kinds the core only ever stores a value for,
/// never dereferences (object, resource, reference, AST node — out of
/// scope per spec §1). Kept only so a `Value` round-trips through the
/// array engine without this crate needing to model those subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueKind {
    Object,
    Resource,
    Reference,
    Ast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpaqueRef {
    pub kind: OpaqueKind,
    pub ptr: *mut u8,
}

/// A `HashTable` is `array`'s own type (component G); `Value` cannot name
/// it directly without a dependency cycle, so arrays nest via `Rc` over an
/// opaque handle the `array` module downcasts. See `array::ArrayRef`.
pub type ArrayHandle = Rc<std::cell::RefCell<crate::array::HashTable>>;

#[derive(Clone)]
pub enum ValueKind {
    Undef,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(ZStringRef),
    Array(ArrayHandle),
    /// A cell whose payload is a pointer to another cell — symbol-table
    /// support (spec §4.7.8, §9 "Indirect cells and symbol tables").
    Indirect(*mut Value),
    Opaque(OpaqueRef),
}

impl std::fmt::Debug for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Undef => write!(f, "Undef"),
            ValueKind::Null => write!(f, "Null"),
            ValueKind::Bool(b) => write!(f, "Bool({})", b),
            ValueKind::Int(i) => write!(f, "Int({})", i),
            ValueKind::Double(d) => write!(f, "Double({})", d),
            ValueKind::Str(s) => write!(f, "Str({:?})", s.as_bytes()),
            ValueKind::Array(_) => write!(f, "Array(..)"),
            ValueKind::Indirect(p) => write!(f, "Indirect({:p})", p),
            ValueKind::Opaque(o) => write!(f, "Opaque({:?})", o.kind),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Value {
    pub kind: ValueKind,
    /// Context-dependent scratch word (spec §3.1, SPEC_FULL.md §3.1):
    /// collision-chain `next` bucket index inside an array, a `foreach`
    /// cursor, or a constant cache slot id. Meaning is entirely owned by
    /// whichever subsystem is holding the cell.
    pub aux: Aux,
}

impl Value {
    pub fn undef() -> Value {
        Value { kind: ValueKind::Undef, aux: Aux::None }
    }

    pub fn new(kind: ValueKind) -> Value {
        Value { kind, aux: Aux::None }
    }

    #[inline]
    pub fn is_undef(&self) -> bool {
        matches!(self.kind, ValueKind::Undef)
    }

    /// Spec §4.7.8: "not INDIRECT, or the target is not UNDEF".
    pub fn is_effectively_undef(&self) -> bool {
        match &self.kind {
            ValueKind::Undef => true,
            ValueKind::Indirect(target) => unsafe { (**target).is_undef() },
            _ => false,
        }
    }

    /// Resolve through one level of INDIRECT, if present.
    pub fn deref_indirect(&self) -> &Value {
        match &self.kind {
            ValueKind::Indirect(target) => unsafe { &**target },
            _ => self,
        }
    }

    pub fn deref_indirect_mut(&mut self) -> &mut Value {
        match &mut self.kind {
            ValueKind::Indirect(target) => unsafe { &mut **target },
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_undef_target_is_effectively_undef() {
        let mut target = Value::new(ValueKind::Undef);
        let indirect = Value::new(ValueKind::Indirect(&mut target as *mut Value));
        assert!(indirect.is_effectively_undef());
    }

    #[test]
    fn indirect_live_target_is_not_effectively_undef() {
        let mut target = Value::new(ValueKind::Int(5));
        let indirect = Value::new(ValueKind::Indirect(&mut target as *mut Value));
        assert!(!indirect.is_effectively_undef());
    }
}
