//! Module dependency graph.
//!
//! # Module Structure
//!
//! ```text
//! module/
//! ├── compiler   # Compiler trait (external collaborator)
//! ├── context    # ModuleContext: cross-pass registry, require/evict/meta
//! ├── factory    # ModuleFactory: per-pass resolve + memoized compile
//! ├── graph      # DependencyGraph: forward/reverse edges
//! └── node       # Module: one file, its edges and persisted record
//! ```
//!
//! # Persisted state
//!
//! For each compiled file `F`:
//!
//! | Key                           | Content                          |
//! |-------------------------------|----------------------------------|
//! | `compile/F`                   | compiled code                    |
//! | `compile/F.imports.json`      | raw import specifiers            |
//! | `modules/F.meta.json`         | `{dependencies, mtime}` record   |
//!
//! Every payload carries a `.stats` sidecar with its mtime.

mod compiler;
mod context;
mod factory;
mod graph;
mod node;


pub use compiler::{CompileOutput, Compiler};
pub use context::{EvictOptions, MODULES_NAMESPACE, ModuleContext, ModuleEvent, ModuleMeta};
pub use factory::{COMPILE_NAMESPACE, Compiled, IMPORTS_SUFFIX, ModuleFactory, Source, context_of};
pub use graph::DependencyGraph;
pub use node::{META_SUFFIX, Module, ModuleRecord, Phase, meta_key};
