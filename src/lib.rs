//! Microhost - a micro-frontend host
//!
//! Loads independently built sub-applications into one page, gives each a
//! sandboxed view of the shared global scope, and drives their bootstrap,
//! mount and unmount hooks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use microhost::{AppDescriptor, HostConfig, MicroHost};
//! use microhost::loader::{MemoryFetcher, NativeModules};
//!
//! # async fn demo() -> microhost::Result<()> {
//! let fetcher = Arc::new(MemoryFetcher::new());
//! let modules = Arc::new(NativeModules::new());
//! let host = MicroHost::new(HostConfig::default(), fetcher, modules);
//!
//! let alpha = AppDescriptor::new("alpha", "/alpha.js", "#alpha");
//! host.load_app(&alpha).await?;
//! host.mount_app("alpha").await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod host;
pub mod loader;
pub mod output;
pub mod parser;
pub mod registry;
pub mod sandbox;
pub mod scope;
pub mod script;

#[cfg(feature = "repl")]
pub mod repl;

pub use config::{HostConfig, HostManifest};
pub use document::Document;
pub use error::{HostError, Result};
pub use host::{AppDescriptor, AppStatus, HostReport, MicroHost};
pub use output::{format_checks, format_report, OutputFormat};
pub use parser::{parse_script, Script};
pub use registry::{AppLifecycle, AppState, RegistrationHook};
pub use sandbox::{Sandbox, SandboxMode, ScopeProxy};
pub use scope::GlobalScope;
