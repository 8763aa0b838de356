//! Script execution seam

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::document::Document;
use crate::registry::RegistrationHook;
use crate::sandbox::ScopeProxy;

/// Everything a module sees while it runs
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    /// Name the host is loading the module for
    pub app_name: String,
    /// Sandboxed view of the global scope
    pub scope: ScopeProxy,
    pub document: Document,
    /// The only host capability a module receives
    pub register: RegistrationHook,
}

/// Executes a module script
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Run the module at `url` to completion
    async fn run_module(&self, url: &str, env: ModuleEnv) -> anyhow::Result<()>;
}

type ModuleFn = Arc<dyn Fn(ModuleEnv) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Modules implemented as Rust closures, keyed by url
#[derive(Default)]
pub struct NativeModules {
    modules: Mutex<HashMap<String, ModuleFn>>,
    runs: Mutex<HashMap<String, usize>>,
}

impl NativeModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the module served at `url`
    pub fn define<F, Fut>(&self, url: &str, module: F)
    where
        F: Fn(ModuleEnv) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let module: ModuleFn = Arc::new(move |env| module(env).boxed());
        self.modules.lock().insert(url.to_string(), module);
    }

    /// Builder form of [`define`](Self::define)
    pub fn with<F, Fut>(self, url: &str, module: F) -> Self
    where
        F: Fn(ModuleEnv) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.define(url, module);
        self
    }

    /// How many times the module at `url` was executed
    pub fn run_count(&self, url: &str) -> usize {
        self.runs.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ScriptRuntime for NativeModules {
    async fn run_module(&self, url: &str, env: ModuleEnv) -> anyhow::Result<()> {
        let module = self.modules.lock().get(url).cloned();
        let Some(module) = module else {
            anyhow::bail!("no module defined at '{}'", url);
        };
        *self.runs.lock().entry(url.to_string()).or_insert(0) += 1;
        module(env).await
    }
}

impl std::fmt::Debug for NativeModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut urls: Vec<String> = self.modules.lock().keys().cloned().collect();
        urls.sort();
        f.debug_struct("NativeModules").field("urls", &urls).finish()
    }
}
