//! Built-in sources.

pub mod random;
pub mod uptime;

pub use random::RandomSource;
pub use uptime::{Uptime, UptimeSource};
