//! The composition orchestrator
//!
//! `MicroHost` sequences the sandbox, the resource loader and the lifecycle
//! registry. A load marks its name as in flight before the first suspension
//! point, so a second `load_app` for the same name joins the first instead of
//! loading twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::document::Document;
use crate::error::{HostError, Result};
use crate::loader::{AssetFetcher, ModuleEnv, ResourceLoader, ScriptRuntime};
use crate::registry::{AppState, LifecycleRegistry, RegistrationHook};
use crate::sandbox::{DynamicEval, Sandbox, ScopeProxy};
use crate::scope::{GlobalScope, ENVIRONMENT_KEY};

use super::descriptor::AppDescriptor;
use super::report::{AppStatus, HostReport, MountInfo};

/// Attribute marking a mount element that shows the loading indicator
pub const LOADING_ATTRIBUTE: &str = "data-micro-loading";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadPhase {
    Loading,
    Loaded,
    Failed(String),
}

enum LoadStart {
    Ready,
    Join(watch::Receiver<LoadPhase>),
    Fresh(watch::Sender<LoadPhase>),
    /// Registered, but bootstrap never succeeded
    Resume(watch::Sender<LoadPhase>),
}

/// Marks a name as loading until finished or dropped
struct LoadSlot<'a> {
    loads: &'a Mutex<HashMap<String, watch::Receiver<LoadPhase>>>,
    hook: &'a RegistrationHook,
    name: &'a str,
    phase: Option<watch::Sender<LoadPhase>>,
}

impl LoadSlot<'_> {
    fn finish(mut self, phase: LoadPhase) {
        if let Some(tx) = self.phase.take() {
            // Joiners may all be gone
            let _ = tx.send(phase);
        }
        self.loads.lock().remove(self.name);
    }
}

impl Drop for LoadSlot<'_> {
    fn drop(&mut self) {
        if self.phase.is_some() {
            self.loads.lock().remove(self.name);
            self.hook.forget(self.name);
            warn!(app = self.name, "load cancelled before completion");
        }
    }
}

/// Host-side entry point for loading, mounting and unmounting sub-applications
pub struct MicroHost {
    config: HostConfig,
    scope: GlobalScope,
    document: Document,
    fetcher: Arc<dyn AssetFetcher>,
    runtime: Arc<dyn ScriptRuntime>,
    evaluator: Option<Arc<dyn DynamicEval>>,
    sandbox: Sandbox,
    loader: ResourceLoader,
    registry: Arc<LifecycleRegistry>,
    hook: RegistrationHook,
    loads: Mutex<HashMap<String, watch::Receiver<LoadPhase>>>,
    descriptors: Mutex<BTreeMap<String, AppDescriptor>>,
}

impl MicroHost {
    /// Create a host with a fresh scope and document
    pub fn new(
        config: HostConfig,
        fetcher: Arc<dyn AssetFetcher>,
        runtime: Arc<dyn ScriptRuntime>,
    ) -> Self {
        let scope = GlobalScope::new();
        scope.set(ENVIRONMENT_KEY, Value::Bool(true));
        let document = Document::new();
        let registry = Arc::new(LifecycleRegistry::new());

        Self {
            sandbox: Sandbox::new(scope.clone(), config.sandbox_mode),
            loader: ResourceLoader::new(document.clone(), fetcher.clone(), runtime.clone()),
            hook: RegistrationHook::new(registry.clone()),
            registry,
            config,
            scope,
            document,
            fetcher,
            runtime,
            evaluator: None,
            loads: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Use an existing global scope. Sets the environment flag on it.
    pub fn with_scope(mut self, scope: GlobalScope) -> Self {
        scope.set(ENVIRONMENT_KEY, Value::Bool(true));
        self.scope = scope;
        self.sandbox = self.build_sandbox();
        self
    }

    /// Use an existing document
    pub fn with_document(mut self, document: Document) -> Self {
        self.loader = ResourceLoader::new(
            document.clone(),
            self.fetcher.clone(),
            self.runtime.clone(),
        );
        self.document = document;
        self
    }

    /// Install a dynamic evaluation capability for sandboxed code
    pub fn with_evaluator(mut self, evaluator: Arc<dyn DynamicEval>) -> Self {
        self.evaluator = Some(evaluator);
        self.sandbox = self.build_sandbox();
        self
    }

    fn build_sandbox(&self) -> Sandbox {
        let sandbox = Sandbox::new(self.scope.clone(), self.config.sandbox_mode);
        match &self.evaluator {
            Some(evaluator) => sandbox.with_evaluator(evaluator.clone()),
            None => sandbox,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The real global scope
    pub fn scope(&self) -> &GlobalScope {
        &self.scope
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &ResourceLoader {
        &self.loader
    }

    /// The interception object of the most recently activated sandbox
    pub fn published_proxy(&self) -> Option<ScopeProxy> {
        self.sandbox.published_proxy()
    }

    /// Load a sub-application and run its bootstrap hook.
    ///
    /// Resolves at once if the name is already bootstrapped, and joins the
    /// in-flight load if one is running. If an earlier bootstrap hook failed,
    /// only bootstrap is retried. Any other failed load leaves its partial
    /// state in place until [`unload_app`](Self::unload_app).
    pub async fn load_app(&self, descriptor: &AppDescriptor) -> Result<()> {
        descriptor.validate()?;
        let name = descriptor.name.as_str();

        // No suspension point before the name is marked
        let start = {
            let mut loads = self.loads.lock();
            if let Some(rx) = loads.get(name) {
                LoadStart::Join(rx.clone())
            } else {
                let state = self.registry.state(name);
                if state != AppState::Unloaded && state != AppState::Loaded {
                    LoadStart::Ready
                } else {
                    let (tx, rx) = watch::channel(LoadPhase::Loading);
                    loads.insert(name.to_string(), rx);
                    if state == AppState::Loaded {
                        LoadStart::Resume(tx)
                    } else {
                        LoadStart::Fresh(tx)
                    }
                }
            }
        };

        let (tx, resume) = match start {
            LoadStart::Ready => {
                debug!(app = name, "already loaded");
                return Ok(());
            }
            LoadStart::Join(rx) => {
                debug!(app = name, "joining in-flight load");
                return join_load(name, rx).await;
            }
            LoadStart::Fresh(tx) => (tx, false),
            LoadStart::Resume(tx) => (tx, true),
        };

        let slot = LoadSlot {
            loads: &self.loads,
            hook: &self.hook,
            name,
            phase: Some(tx),
        };

        info!(app = name, script = %descriptor.script_url, "loading sub-application");
        self.descriptors
            .lock()
            .insert(name.to_string(), descriptor.clone());
        self.show_fallback(descriptor);

        let outcome = if resume {
            info!(app = name, "retrying bootstrap");
            self.registry.bootstrap(name).await
        } else {
            self.load_fresh(descriptor).await
        };

        match outcome {
            Ok(()) => {
                self.clear_fallback(descriptor);
                slot.finish(LoadPhase::Loaded);
                info!(app = name, "sub-application loaded");
                Ok(())
            }
            Err(e) => {
                self.hook.forget(name);
                warn!(app = name, code = e.code(), error = %e, "load failed");
                slot.finish(LoadPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn load_fresh(&self, descriptor: &AppDescriptor) -> Result<()> {
        let name = &descriptor.name;
        let scope = self.sandbox.activate(name)?;
        let registered = self.hook.expect(name, &descriptor.mount_selector);

        if let Some(style) = &descriptor.style_url {
            self.loader.load_style(style, name).await?;
        }

        let env = ModuleEnv {
            app_name: name.clone(),
            scope,
            document: self.document.clone(),
            register: self.hook.scoped(name),
        };

        let timeout = self.config.registration_timeout;
        let ready = self.run_until_registered(descriptor, env, registered);
        match tokio::time::timeout(timeout, ready).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(app = %name, timeout_ms = timeout.as_millis() as u64, "registration timed out");
                return Err(HostError::RegistrationTimeout {
                    name: name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        self.registry.bootstrap(name).await
    }

    /// Run the module until it has registered. A module still running when
    /// its registration arrives is dropped; one that finishes first may still
    /// register from work it started.
    async fn run_until_registered(
        &self,
        descriptor: &AppDescriptor,
        env: ModuleEnv,
        mut registered: oneshot::Receiver<()>,
    ) -> Result<()> {
        let name = descriptor.name.as_str();
        let run = self.loader.load_script(&descriptor.script_url, env);
        tokio::pin!(run);

        let ready = tokio::select! {
            biased;
            finished = &mut run => {
                finished?;
                (&mut registered).await
            }
            ready = &mut registered => {
                debug!(app = name, "registered before the module finished");
                ready
            }
        };

        ready.map_err(|_| {
            HostError::Registration(format!("wait for '{}' to register was abandoned", name))
        })
    }

    /// Run the mount hook of a loaded sub-application
    pub async fn mount_app(&self, name: &str) -> Result<()> {
        self.registry.mount(name).await
    }

    /// Unmount, then revert the sandbox, then drop the stylesheet.
    /// The unmount hook runs while the sandbox is still active.
    pub async fn unmount_app(&self, name: &str) -> Result<()> {
        self.registry.unmount(name).await?;
        let reverted = self.sandbox.deactivate(name);
        let unstyled = self.loader.unload_style(name);
        debug!(app = name, reverted, unstyled, "sub-application torn down");
        Ok(())
    }

    /// Release everything held for `name`, whatever state it is in
    pub async fn unload_app(&self, name: &str) -> Result<()> {
        if self.loads.lock().contains_key(name) {
            return Err(HostError::LifecycleState {
                name: name.to_string(),
                operation: "unload",
                state: AppState::Loading,
            });
        }

        if self.registry.state(name) == AppState::Mounted {
            if let Err(e) = self.registry.unmount(name).await {
                warn!(app = name, error = %e, "unmount during unload failed");
            }
        }

        let registered = self.registry.remove(name).is_some();
        let pending = self.hook.forget(name);
        let sandboxed = self.sandbox.deactivate(name);
        let styled = self.loader.unload_style(name);
        let scripted = self.loader.unload_script(name);
        if let Some(descriptor) = self.descriptors.lock().remove(name) {
            self.clear_fallback(&descriptor);
        }

        if registered || pending || sandboxed || styled || scripted {
            info!(app = name, "sub-application unloaded");
        } else {
            debug!(app = name, "nothing to unload");
        }
        Ok(())
    }

    /// Lifecycle state as the host sees it
    pub fn state(&self, name: &str) -> AppState {
        if self.loads.lock().contains_key(name) {
            return AppState::Loading;
        }
        self.registry.state(name)
    }

    /// Snapshot of one sub-application
    pub fn status(&self, name: &str) -> AppStatus {
        let info = self.registry.info(name);
        let proxy = self.sandbox.proxy(name);
        let mount_selector = info.as_ref().map(|i| i.mount_selector.clone()).or_else(|| {
            self.descriptors
                .lock()
                .get(name)
                .map(|d| d.mount_selector.clone())
        });

        AppStatus {
            name: name.to_string(),
            state: self.state(name),
            mount_selector,
            registered_at: info.map(|i| i.registered_at),
            sandbox_active: proxy.is_some(),
            overlay_keys: proxy.map(|p| p.overlay_keys()).unwrap_or_default(),
            stylesheet: self.loader.style(name).map(|s| s.url),
        }
    }

    /// Snapshots of every sub-application the host knows about
    pub fn statuses(&self) -> Vec<AppStatus> {
        let mut names: BTreeSet<String> = self.descriptors.lock().keys().cloned().collect();
        names.extend(self.registry.list().into_iter().map(|i| i.name));
        names.extend(self.sandbox.active_sessions());
        names.into_iter().map(|n| self.status(&n)).collect()
    }

    /// Gather statuses, stylesheets, mount contents and globals
    pub fn report(&self) -> HostReport {
        let descriptors: Vec<AppDescriptor> = self.descriptors.lock().values().cloned().collect();
        let mounts = descriptors
            .iter()
            .filter_map(|d| {
                let node = self.document.query_selector(&d.mount_selector).ok()??;
                let element = self.document.element(node)?;
                Some(MountInfo {
                    app: d.name.clone(),
                    selector: d.mount_selector.clone(),
                    text: element.text().to_string(),
                    loading: element.attr(LOADING_ATTRIBUTE).is_some(),
                })
            })
            .collect();

        HostReport {
            generated_at: Utc::now(),
            sandbox_mode: self.sandbox.mode(),
            apps: self.statuses(),
            stylesheets: self.loader.styles(),
            mounts,
            globals: self.scope.snapshot(),
        }
    }

    fn show_fallback(&self, descriptor: &AppDescriptor) {
        match self.document.query_selector(&descriptor.mount_selector) {
            Ok(Some(node)) => {
                self.document.set_text(node, &self.config.fallback_text);
                self.document
                    .set_attribute(node, LOADING_ATTRIBUTE, &descriptor.name);
            }
            _ => debug!(app = %descriptor.name, "no mount element for loading indicator"),
        }
    }

    fn clear_fallback(&self, descriptor: &AppDescriptor) {
        let Ok(Some(node)) = self.document.query_selector(&descriptor.mount_selector) else {
            return;
        };
        let shows_indicator = self
            .document
            .element(node)
            .is_some_and(|el| el.attr(LOADING_ATTRIBUTE) == Some(descriptor.name.as_str()));
        if shows_indicator {
            self.document.remove_attribute(node, LOADING_ATTRIBUTE);
            self.document.set_text(node, "");
        }
    }
}

async fn join_load(name: &str, mut rx: watch::Receiver<LoadPhase>) -> Result<()> {
    let outcome = rx
        .wait_for(|phase| *phase != LoadPhase::Loading)
        .await
        .map(|phase| phase.clone());

    match outcome {
        Ok(LoadPhase::Failed(reason)) => Err(HostError::LoadFailed {
            name: name.to_string(),
            reason,
        }),
        Ok(_) => Ok(()),
        Err(_) => Err(HostError::LoadFailed {
            name: name.to_string(),
            reason: "the load was cancelled".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{MemoryFetcher, NativeModules};
    use crate::registry::AppLifecycle;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Quiet;

    #[async_trait]
    impl AppLifecycle for Quiet {
        async fn bootstrap(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn mount(&self, _mount_selector: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn unmount(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn host(modules: NativeModules, timeout: Duration) -> MicroHost {
        let config = HostConfig::default().with_registration_timeout(timeout);
        MicroHost::new(config, Arc::new(MemoryFetcher::new()), Arc::new(modules))
            .with_document(Document::with_mount_points(["alpha"]))
    }

    fn mount_element(host: &MicroHost) -> crate::document::Element {
        let node = host.document().query_selector("#alpha").unwrap().unwrap();
        host.document().element(node).unwrap()
    }

    #[test]
    fn test_environment_flag_set() {
        let host = host(NativeModules::new(), Duration::from_secs(1));
        assert_eq!(host.scope().get(ENVIRONMENT_KEY), Some(Value::Bool(true)));

        let shared = GlobalScope::new();
        let host = host.with_scope(shared.clone());
        assert!(shared.is_hosted());
        assert!(host.scope().same_as(&shared));
    }

    #[tokio::test]
    async fn test_silent_module_times_out() {
        let modules = NativeModules::new().with("/a.js", |_env: ModuleEnv| async { Ok(()) });
        let host = host(modules, Duration::from_millis(20));

        let err = host
            .load_app(&AppDescriptor::new("alpha", "/a.js", "#alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::RegistrationTimeout { timeout_ms: 20, .. }));
        assert!(err.requires_unload());

        // Indicator stays; sandbox stays until unload
        let el = mount_element(&host);
        assert_eq!(el.text(), "Loading...");
        assert_eq!(el.attr(LOADING_ATTRIBUTE), Some("alpha"));
        assert!(host.sandbox().is_active("alpha"));
        assert_eq!(host.state("alpha"), AppState::Unloaded);
    }

    #[tokio::test]
    async fn test_reload_after_failure_needs_unload() {
        let modules = NativeModules::new().with("/a.js", |_env: ModuleEnv| async {
            Err(anyhow::anyhow!("syntax error"))
        });
        let host = host(modules, Duration::from_secs(1));
        let descriptor = AppDescriptor::new("alpha", "/a.js", "#alpha");

        let err = host.load_app(&descriptor).await.unwrap_err();
        assert!(matches!(err, HostError::ResourceLoad { .. }));

        let err = host.load_app(&descriptor).await.unwrap_err();
        assert!(matches!(err, HostError::SandboxReentry(_)));

        host.unload_app("alpha").await.unwrap();
        assert!(!host.sandbox().is_active("alpha"));
        assert!(!host.loader().has_script("alpha"));
        let el = mount_element(&host);
        assert_eq!(el.text(), "");
        assert!(el.attr(LOADING_ATTRIBUTE).is_none());
    }

    #[tokio::test]
    async fn test_successful_load_clears_indicator() {
        let modules = NativeModules::new().with("/a.js", |env: ModuleEnv| async move {
            env.register.register("alpha", Arc::new(Quiet))?;
            Ok(())
        });
        let host = host(modules, Duration::from_secs(1));
        host.load_app(&AppDescriptor::new("alpha", "/a.js", "#alpha"))
            .await
            .unwrap();

        assert_eq!(host.state("alpha"), AppState::Bootstrapped);
        let el = mount_element(&host);
        assert!(el.attr(LOADING_ATTRIBUTE).is_none());
        assert_eq!(el.text(), "");
    }

    #[tokio::test]
    async fn test_invalid_descriptor_rejected_before_side_effects() {
        let host = host(NativeModules::new(), Duration::from_secs(1));
        let err = host
            .load_app(&AppDescriptor::new("1alpha", "/a.js", "#alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidDescriptor(_)));
        assert!(host.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_unload_unknown_is_noop() {
        let host = host(NativeModules::new(), Duration::from_secs(1));
        host.unload_app("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_hanging_module_is_bounded() {
        let modules = NativeModules::new().with("/a.js", |_env: ModuleEnv| async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        let host = host(modules, Duration::from_millis(30));
        let descriptor = AppDescriptor::new("alpha", "/a.js", "#alpha");

        let (first, second) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(host.load_app(&descriptor), host.load_app(&descriptor))
        })
        .await
        .expect("load_app must give up after the registration timeout");
        assert!(matches!(first, Err(HostError::RegistrationTimeout { timeout_ms: 30, .. })));
        assert!(matches!(second, Err(HostError::LoadFailed { .. })));

        // The name is free again once unloaded
        assert_eq!(host.state("alpha"), AppState::Unloaded);
        host.unload_app("alpha").await.unwrap();
        assert!(!host.sandbox().is_active("alpha"));
    }

    #[tokio::test]
    async fn test_module_running_after_registration_does_not_block() {
        let modules = NativeModules::new().with("/a.js", |env: ModuleEnv| async move {
            env.register.register("alpha", Arc::new(Quiet))?;
            futures::future::pending::<()>().await;
            Ok(())
        });
        let host = host(modules, Duration::from_millis(500));

        tokio::time::timeout(
            Duration::from_secs(2),
            host.load_app(&AppDescriptor::new("alpha", "/a.js", "#alpha")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(host.state("alpha"), AppState::Bootstrapped);
    }

    #[tokio::test]
    async fn test_module_cannot_register_another_name() {
        let modules = NativeModules::new().with("/a.js", |env: ModuleEnv| async move {
            assert!(env.register.register("beta", Arc::new(Quiet)).is_err());
            Ok(())
        });
        let host = host(modules, Duration::from_millis(30));

        let err = host
            .load_app(&AppDescriptor::new("alpha", "/a.js", "#alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::RegistrationTimeout { .. }));
        assert!(!host.registry().contains("beta"));
    }

    struct FailsFirstBootstrap {
        attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl AppLifecycle for FailsFirstBootstrap {
        async fn bootstrap(&self) -> anyhow::Result<()> {
            use std::sync::atomic::Ordering;
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow::anyhow!("cold cache"));
            }
            Ok(())
        }
        async fn mount(&self, _mount_selector: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn unmount(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reload_retries_failed_bootstrap() {
        let modules = NativeModules::new().with("/a.js", |env: ModuleEnv| async move {
            let lifecycle = FailsFirstBootstrap {
                attempts: std::sync::atomic::AtomicUsize::new(0),
            };
            env.register.register("alpha", Arc::new(lifecycle))?;
            Ok(())
        });
        let modules = Arc::new(modules);
        let host = MicroHost::new(
            HostConfig::default(),
            Arc::new(MemoryFetcher::new()),
            modules.clone(),
        )
        .with_document(Document::with_mount_points(["alpha"]));
        let descriptor = AppDescriptor::new("alpha", "/a.js", "#alpha");

        let err = host.load_app(&descriptor).await.unwrap_err();
        assert!(matches!(err, HostError::Hook { phase: "bootstrap", .. }));
        assert_eq!(host.state("alpha"), AppState::Loaded);
        assert_eq!(mount_element(&host).attr(LOADING_ATTRIBUTE), Some("alpha"));

        host.load_app(&descriptor).await.unwrap();
        assert_eq!(host.state("alpha"), AppState::Bootstrapped);
        assert_eq!(modules.run_count("/a.js"), 1);
        assert!(mount_element(&host).attr(LOADING_ATTRIBUTE).is_none());

        host.mount_app("alpha").await.unwrap();
        assert_eq!(host.state("alpha"), AppState::Mounted);
    }

    #[tokio::test]
    async fn test_report_lists_mounts_and_globals() {
        let modules = NativeModules::new().with("/a.js", |env: ModuleEnv| async move {
            env.scope.set("alphaOnly", Value::from(1));
            env.register.register("alpha", Arc::new(Quiet))?;
            Ok(())
        });
        let host = host(modules, Duration::from_secs(1));
        host.load_app(&AppDescriptor::new("alpha", "/a.js", "#alpha"))
            .await
            .unwrap();

        let report = host.report();
        let alpha = report.app("alpha").unwrap();
        assert!(alpha.sandbox_active);
        assert_eq!(alpha.overlay_keys, vec!["alphaOnly"]);
        assert_eq!(report.mounts.len(), 1);
        assert!(!report.mounts[0].loading);
        assert!(report.globals.contains_key(ENVIRONMENT_KEY));
        assert!(!report.globals.contains_key("alphaOnly"));
    }
}
