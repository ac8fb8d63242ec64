//! kiln - incremental build cache and module dependency graph.
//!
//! # Layers
//!
//! ```text
//! lock      Lock, KeyedMutex        FIFO chains, fail-fast contention
//! fs        FileSystem              DiskFs, MemoryFs
//! cache     Cache, ScopedCache      persisted (content, mtime) under scoped locks
//! resolver  ModuleResolver          request → canonical file, compile?, format
//! module    ModuleContext           require / create / evict / meta
//! build     Build                   config-driven wiring for orchestrators
//! ```

pub mod logger;

pub mod build;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod lock;
pub mod module;
pub mod resolver;

pub use build::Build;
pub use cache::{Cache, CacheError, ScopedCache, StorageLayout};
pub use config::{BuildConfig, ConfigError};
pub use error::{Error, Result};
pub use fs::{DiskFs, FileSystem, MemoryFs, Mtime};
pub use lock::{KeyedMutex, Lock, LockError};
pub use module::{
    CompileOutput, Compiler, EvictOptions, Module, ModuleContext, ModuleEvent, ModuleFactory,
    ModuleMeta, Phase,
};
pub use resolver::{ModuleKind, ModuleResolver, ResolvedModule};
