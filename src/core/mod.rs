//! Runtime core: the polling executor, its lifecycle, the cache, and the
//! built-in sources and sinks.

pub mod cache;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod sinks;
pub mod sources;
pub mod traits;
