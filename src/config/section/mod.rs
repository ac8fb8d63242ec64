//! Configuration section definitions.

mod cache;
mod resolver;

pub use cache::CacheConfig;
pub use resolver::{ResolverConfig, dotted_extension, has_extension};
