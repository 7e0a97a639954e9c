//! Resource registry (spec §4.6 external collaborator, §6 "Resource
//! registry"). Grounded on `examples/original_source/Zend/zend_list.c` /
//! `zend_list.h`: native handles are stored in an integer-indexed
//! associative array — a direct reuse of the array engine (component G)
//! with packed integer keys — and a per-type pair of destructors
//! (regular/persistent) runs at resource-free time.
//!
//! Two lists exist, per spec §6: `regular_list` (one per request, dropped
//! at request shutdown) and `persistent_list` (process-wide, survives
//! across requests). The latter is the one genuinely global piece of
//! mutable state in this crate; see `PERSISTENT_LIST` below for why it is
//! thread-local rather than the `once_cell::sync::Lazy` spec's ambient-
//! stack section otherwise calls for. The per-request list is owned by
//! whatever request context constructs it.

use crate::array::{HashTable, Key, PutMode};
use crate::value::{Aux, OpaqueKind, OpaqueRef, Value, ValueKind};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

pub type ResourceTypeId = i32;
pub type DtorFn = fn(ptr: *mut u8);

#[derive(Clone, Copy)]
pub struct DtorPair {
    pub regular: Option<DtorFn>,
    pub persistent: Option<DtorFn>,
    pub type_name: &'static str,
}

/// Registry of `(regular_dtor, persistent_dtor)` pairs keyed by a module-
/// assigned type id (spec §6: "a registered per-type pair of destructors
/// ... is invoked at resource-free time"). Module registration is rare and
/// process-wide by nature (every request shares the same set of known
/// resource types), so this is a second `once_cell` global rather than
/// per-request state.
static DTOR_TABLE: Lazy<Mutex<HashMap<ResourceTypeId, DtorPair>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn register_destructors(type_id: ResourceTypeId, pair: DtorPair) {
    DTOR_TABLE.lock().unwrap().insert(type_id, pair);
}

fn dtor_for(type_id: ResourceTypeId) -> Option<DtorPair> {
    DTOR_TABLE.lock().unwrap().get(&type_id).copied()
}

/// One request's resource table: a packed-integer-keyed array of opaque
/// handles (spec §6: "resources are stored in a per-request integer-
/// indexed associative array"). Destruction order is push order reversed
/// ("reverse-apply destruction order at request shutdown").
pub struct ResourceList {
    table: HashTable,
    insertion_order: Vec<i64>,
}

impl ResourceList {
    pub fn new() -> ResourceList {
        ResourceList { table: HashTable::new_empty(), insertion_order: Vec::new() }
    }

    /// Register a native handle, returning the integer id it was stored
    /// under (spec: "`zend_register_resource`").
    pub fn insert(&mut self, ptr: *mut u8, type_id: ResourceTypeId) -> i64 {
        let id = self.table.next_free_index;
        let mut value = Value::new(ValueKind::Opaque(OpaqueRef { kind: OpaqueKind::Resource, ptr }));
        value.aux = Aux::ResourceType(type_id as u32);
        self.table.put(Key::Int(id), value, PutMode::AddNext).expect("packed append never rejects AddNext");
        self.insertion_order.push(id);
        id
    }

    pub fn get(&self, id: i64) -> Option<*mut u8> {
        self.table.find_int(id).and_then(|b| match &b.value.kind {
            ValueKind::Opaque(OpaqueRef { ptr, .. }) => Some(*ptr),
            _ => None,
        })
    }

    /// Run this resource's registered destructor and remove it from the
    /// table (spec: "`zend_list_free`"/"`zend_list_delete`").
    pub fn free(&mut self, id: i64, persistent: bool) {
        let (ptr, type_id) = match self.table.find_int(id) {
            Some(b) => match (&b.value.kind, b.value.aux) {
                (ValueKind::Opaque(OpaqueRef { ptr, .. }), Aux::ResourceType(t)) => (*ptr, t as ResourceTypeId),
                (ValueKind::Opaque(OpaqueRef { ptr, .. }), _) => (*ptr, 0),
                _ => return,
            },
            None => return,
        };
        if let Some(pair) = dtor_for(type_id) {
            let dtor = if persistent { pair.persistent } else { pair.regular };
            if let Some(f) = dtor {
                f(ptr);
            }
        }
        self.table.delete_int(id);
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Request shutdown: reverse-apply destructors (spec §6: "Reverse-apply
    /// destruction order at request shutdown").
    pub fn shutdown(&mut self) {
        for id in self.insertion_order.clone().into_iter().rev() {
            self.free(id, false);
        }
        self.insertion_order.clear();
    }

    pub fn count(&self) -> usize {
        self.table.count()
    }
}

impl Default for ResourceList {
    fn default() -> Self {
        ResourceList::new()
    }
}

/// The persistent resource list (spec §6: persistent resources — database
/// links kept open across requests, etc. — live here instead of in a
/// request's `ResourceList`).
///
/// `ResourceList` embeds a `HashTable`, which (via `Value::kind`'s
/// `Array(Rc<RefCell<HashTable>>)`, `Indirect(*mut Value)`, and
/// `Opaque.ptr: *mut u8` variants) is transitively neither `Send` nor
/// `Sync`; a `once_cell::sync::Lazy<Mutex<ResourceList>>` cannot be named
/// at all under those bounds. Scoped thread-local instead, the same way
/// `iterator.rs`'s `REGISTRY` is (spec §9's design note: "scope to the
/// execution context, thread-local in a multi-threaded host") — one OS
/// thread hosts one interpreter context at a time, and persistent
/// resources only need to survive across that context's successive
/// requests, not across threads.
thread_local! {
    pub static PERSISTENT_LIST: RefCell<ResourceList> = RefCell::new(ResourceList::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    fn test_dtor(_ptr: *mut u8) {
        DROPPED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn insert_and_shutdown_runs_destructor_in_reverse_order() {
        register_destructors(42, DtorPair { regular: Some(test_dtor), persistent: None, type_name: "test" });
        let before = DROPPED.load(Ordering::SeqCst);
        let mut list = ResourceList::new();
        let a = list.insert(std::ptr::null_mut(), 42);
        let b = list.insert(std::ptr::null_mut(), 42);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(list.count(), 2);
        list.shutdown();
        assert_eq!(DROPPED.load(Ordering::SeqCst), before + 2);
        assert_eq!(list.count(), 0);
    }
}
