//! Resource loading: asset fetching, module execution and document insertion

mod fetch;
mod resources;
mod runtime;

pub use fetch::{AssetFetcher, DirFetcher, MemoryFetcher};
pub use resources::{ResourceLoader, StyleHandle, APP_ATTRIBUTE};
pub use runtime::{ModuleEnv, NativeModules, ScriptRuntime};
