//! tsrun compiler adapter
//!
//! Turns an entry module into a single executable script plus the manifest of
//! files it was built from. The compiler itself sits behind the
//! [`CompilerService`] trait; [`ScriptCompiler`] is the built-in one, which
//! links local modules into a registry bundle and leaves packages and builtins
//! to the runtime's own loader.

pub mod adapter;
pub mod bundle;
pub mod dep_graph;
pub mod diagnostic;
pub mod error;
pub mod manifest;
pub mod rewrite;
pub mod scanner;
pub mod script;
pub mod service;
pub mod transpile;

pub use adapter::Compiler;
pub use diagnostic::{Diagnostic, Severity};
pub use error::{BuildError, CompileError};
pub use manifest::{BuildResult, DependencyManifest};
pub use script::ScriptCompiler;
pub use service::{CompilerOutput, CompilerService, ModuleLookup};
pub use transpile::{CommandTranspiler, Passthrough, Transpiler};
