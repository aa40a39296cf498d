//! SwissTable-style flat hash map. Single-allocation open addressing
//! with control-byte groups (16-wide SSE2 where available, 8-wide SWAR
//! fallback elsewhere), 7-bit H2 tags, tombstone-aware probing, and a
//! configurable load limit.

mod error;
mod group;
mod map;
mod raw;

pub use error::{FhmError, FhmResult};
pub use map::Map;
