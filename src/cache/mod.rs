//! Server-side cache for upstream calls.
//!
//! Results are memoized per function name and argument list, carry tags for
//! bulk invalidation after a mutation, and expire after a named lifetime.
//! Storage is pluggable so the cache can be switched off by configuration.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage};
pub use traits::{CacheDirective, CacheLife};
