//! A per-request, size-segregated heap allocator and the polymorphic
//! ordered associative array built on top of it.
//!
//! The crate is organized the way the teacher separates concerns: each
//! module owns one layer of the allocator (OS provider → chunk manager →
//! size-class/large/huge paths → heap façade), plus the two larger
//! subsystems — the array engine (`array/`) and the external iterator
//! registry (`iterator`) — that consume the heap without being part of it.

pub mod array;
pub mod bitset;
pub mod chunk;
pub mod chunk_cache;
pub mod config;
pub mod custom_allocator;
pub mod error;
pub mod heap;
pub mod huge;
pub mod iterator;
pub mod os;
pub mod resource;
pub mod size_class;
pub mod stats;
pub mod types;
pub mod value;
pub mod zstring;

pub use error::{MmError, MmResult};
pub use heap::{Heap, ShutdownMode};
