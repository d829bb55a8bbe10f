//! tsrun module resolution
//!
//! Maps import specifiers to files on disk. Handles relative (`.`, `..`)
//! specifiers, `tsconfig.json` path aliases, builtin runtime modules and
//! packages under `node_modules`, choosing a package entry point according to
//! the importing file's module format (ES module vs CommonJS).

pub mod error;
pub mod format;
pub mod npm_resolver;
pub mod package_json;
pub mod probe;
pub mod resolver;
pub mod tsconfig;

pub use error::{ResolveError, ResolveResult};
pub use format::{EntryField, ModuleFormat};
pub use resolver::{ModuleResolver, ResolvedModule};
