//! Error taxonomy for the heap and array engines (spec §7).
//!
//! Out-of-memory, integer overflow, "recursion too deep", and freeing a
//! pointer this heap does not own all reach the caller as a `Result`.
//! `Heap::free` additionally `debug_assert!`s on misuse so a development
//! build fails loudly at the call site rather than only in the returned
//! error; other corruption checks remain debug-only assertions (see
//! `Heap::fatal`).

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    #[error("Allowed memory size of {limit} bytes exhausted (allocated {allocated}, tried to allocate {tried} bytes)")]
    OutOfMemory {
        allocated: usize,
        tried: usize,
        limit: usize,
    },

    #[error("Possible integer overflow in memory allocation ({nmemb} * {size} + {offset})")]
    IntegerOverflow {
        nmemb: usize,
        size: usize,
        offset: usize,
    },

    #[error("Nesting level too deep - recursive dependency? (depth {depth}, limit {limit})")]
    RecursionTooDeep { depth: u8, limit: u8 },

    #[error("free(): pointer {ptr:#x} was not allocated by this heap")]
    AllocatorMisuse { ptr: usize },
}

pub type MmResult<T> = Result<T, MmError>;
