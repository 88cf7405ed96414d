// src/lib.rs

pub mod memory;
pub mod redis_store;
pub mod resolver;
pub mod store;

// Re-export commonly used types for convenience
pub use memory::{MemoryStore, StoredValue};
pub use redis_store::RedisStore;
pub use resolver::{
    NormalizedValue, PROBE_ORDER, Resolution, ResolveError, Strategy, decode_or_raw, resolve,
};
pub use store::{KeyStore, StoreError, StoreResult};
