//! Import request resolution.
//!
//! Two layers:
//!
//! - [`Resolve`]: the physical primitive, `(context, request) → file`.
//!   [`FsResolve`] is the default; orchestrators may plug in their own.
//! - [`ModuleResolver`]: splits loader chains, canonicalizes symlinks,
//!   decides whether a file is compiled and which module format it uses.
//!   Resolution failures degrade to [`ModuleKind::Builtin`].

mod fs_resolve;
mod module_resolver;
mod resolve;

pub use fs_resolve::FsResolve;
pub use module_resolver::{ModuleKind, ModuleResolver, ResolvedModule};
pub use resolve::{PackageDescription, Resolve, ResolveError, Resolved};
