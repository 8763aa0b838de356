//! Per-sub-application isolation of the shared global scope
//!
//! Activating a sandbox snapshots the global scope and hands out a
//! [`ScopeProxy`]. Writes made through the proxy stay in the session's
//! overlay. Deactivation reverts every overlaid key on the real scope: keys
//! present at activation get their baseline value back, keys added during
//! the session are deleted.

mod eval;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::scope::GlobalScope;

pub use eval::{CompiledFunction, DynamicEval};
pub use session::{SandboxSession, ScopeProxy};

/// How much of the dynamic evaluation surface the sandbox intercepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Overlay isolation only
    #[default]
    Basic,
    /// Overlay isolation plus per-session memoisation of evaluations
    Enhanced,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxMode::Basic => write!(f, "basic"),
            SandboxMode::Enhanced => write!(f, "enhanced"),
        }
    }
}

/// Owns every active sandbox session, keyed by sub-application name
pub struct Sandbox {
    scope: GlobalScope,
    mode: SandboxMode,
    evaluator: Option<Arc<dyn DynamicEval>>,
    sessions: Mutex<HashMap<String, Arc<SandboxSession>>>,
    /// Proxy of the most recently activated session
    published: Mutex<Option<ScopeProxy>>,
}

impl Sandbox {
    /// Create a sandbox over the given scope
    pub fn new(scope: GlobalScope, mode: SandboxMode) -> Self {
        Self {
            scope,
            mode,
            evaluator: None,
            sessions: Mutex::new(HashMap::new()),
            published: Mutex::new(None),
        }
    }

    /// Install a dynamic evaluation capability
    pub fn with_evaluator(mut self, evaluator: Arc<dyn DynamicEval>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// The scope this sandbox isolates
    pub fn scope(&self) -> &GlobalScope {
        &self.scope
    }

    /// The configured interception mode
    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    /// Start a session for `app` and return its interception object
    pub fn activate(&self, app: &str) -> Result<ScopeProxy> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(app) {
            warn!(app, "sandbox activation rejected: session already active");
            return Err(HostError::SandboxReentry(app.to_string()));
        }

        let baseline = self.scope.snapshot();
        let baseline_len = baseline.len();
        let session = Arc::new(SandboxSession::new(
            app,
            baseline,
            self.mode == SandboxMode::Enhanced,
        ));
        sessions.insert(app.to_string(), Arc::clone(&session));
        drop(sessions);

        let proxy = ScopeProxy::new(session, self.scope.clone(), self.evaluator.clone());
        *self.published.lock() = Some(proxy.clone());

        info!(app, mode = %self.mode, baseline = baseline_len, "sandbox activated");
        Ok(proxy)
    }

    /// End the session for `app`, reverting its writes.
    /// Returns `false` when no session was active.
    pub fn deactivate(&self, app: &str) -> bool {
        let Some(session) = self.sessions.lock().remove(app) else {
            debug!(app, "sandbox deactivation skipped: no active session");
            return false;
        };

        let reverted = session.revert(&self.scope);

        let mut published = self.published.lock();
        if published.as_ref().is_some_and(|p| p.owner() == app) {
            *published = None;
        }

        info!(app, reverted, "sandbox deactivated");
        true
    }

    /// The interception object of an active session
    pub fn proxy(&self, app: &str) -> Option<ScopeProxy> {
        let session = self.sessions.lock().get(app).cloned()?;
        Some(ScopeProxy::new(
            session,
            self.scope.clone(),
            self.evaluator.clone(),
        ))
    }

    /// Whether `app` has an active session
    pub fn is_active(&self, app: &str) -> bool {
        self.sessions.lock().contains_key(app)
    }

    /// Names of every app with an active session, sorted
    pub fn active_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// The interception object published by the most recent activation
    pub fn published_proxy(&self) -> Option<ScopeProxy> {
        self.published.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Evaluator that counts calls and echoes a global named by the source
    #[derive(Default)]
    struct CountingEval {
        calls: AtomicUsize,
    }

    impl DynamicEval for CountingEval {
        fn evaluate(&self, scope: &ScopeProxy, source: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(scope.get(source).unwrap_or(Value::Null))
        }

        fn construct_function(
            &self,
            _scope: &ScopeProxy,
            params: &[String],
            body: &str,
        ) -> Result<CompiledFunction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let arity = params.len();
            Ok(CompiledFunction::new(body, move |_| Ok(json!(arity))))
        }
    }

    fn host_scope() -> GlobalScope {
        GlobalScope::with_entries([("title", json!("host")), ("count", json!(1))])
    }

    #[test]
    fn test_deactivate_never_activated_is_noop() {
        let sandbox = Sandbox::new(host_scope(), SandboxMode::Basic);
        assert!(!sandbox.deactivate("ghost"));
        assert_eq!(sandbox.scope().len(), 2);
    }

    #[test]
    fn test_deactivate_twice() {
        let sandbox = Sandbox::new(host_scope(), SandboxMode::Basic);
        sandbox.activate("alpha").unwrap();
        assert!(sandbox.deactivate("alpha"));
        assert!(!sandbox.deactivate("alpha"));
    }

    #[test]
    fn test_reentry_rejected() {
        let sandbox = Sandbox::new(host_scope(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        proxy.set("x", json!(1));

        let err = sandbox.activate("alpha").unwrap_err();
        assert!(matches!(err, HostError::SandboxReentry(ref n) if n == "alpha"));
        // The original session keeps its overlay
        assert_eq!(sandbox.proxy("alpha").unwrap().get("x"), Some(json!(1)));
    }

    #[test]
    fn test_writes_do_not_reach_real_scope() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();

        assert!(proxy.set("title", json!("alpha")));
        assert_eq!(proxy.get("title"), Some(json!("alpha")));
        assert_eq!(scope.get("title"), Some(json!("host")));
    }

    #[test]
    fn test_added_key_removed_after_deactivate() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        proxy.set("fresh", json!(true));
        // Host writes the same key behind the sandbox's back
        scope.set("fresh", json!("host"));

        sandbox.deactivate("alpha");
        assert!(!scope.contains("fresh"));
    }

    #[test]
    fn test_overwritten_key_restored_after_deactivate() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        proxy.set("count", json!(99));
        scope.set("count", json!(5));

        sandbox.deactivate("alpha");
        assert_eq!(scope.get("count"), Some(json!(1)));
    }

    #[test]
    fn test_untouched_keys_survive_deactivate() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        sandbox.activate("alpha").unwrap();
        scope.set("count", json!(7));
        scope.set("late", json!("x"));

        sandbox.deactivate("alpha");
        assert_eq!(scope.get("count"), Some(json!(7)));
        assert_eq!(scope.get("late"), Some(json!("x")));
    }

    #[test]
    fn test_overlay_wins_over_concurrent_host_write() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        proxy.set("count", json!(2));
        scope.set("count", json!(3));
        assert_eq!(proxy.get("count"), Some(json!(2)));
    }

    #[test]
    fn test_miss_reads_live_scope() {
        let scope = host_scope();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        scope.set("late", json!("seen"));
        assert_eq!(proxy.get("late"), Some(json!("seen")));
        assert!(proxy.contains("late"));
    }

    #[test]
    fn test_sessions_are_independent() {
        let scope = GlobalScope::new();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let alpha = sandbox.activate("alpha").unwrap();
        let beta = sandbox.activate("beta").unwrap();
        alpha.set("shared", json!(1));
        beta.set("shared", json!(2));

        sandbox.deactivate("alpha");
        assert_eq!(beta.get("shared"), Some(json!(2)));
        assert!(!scope.contains("shared"));
        assert_eq!(sandbox.active_sessions(), vec!["beta".to_string()]);
    }

    #[test]
    fn test_write_after_deactivate_rejected() {
        let scope = GlobalScope::new();
        let sandbox = Sandbox::new(scope.clone(), SandboxMode::Basic);
        let proxy = sandbox.activate("alpha").unwrap();
        sandbox.deactivate("alpha");

        assert!(!proxy.set("late", json!(1)));
        assert!(proxy.get("late").is_none());
        assert!(!scope.contains("late"));
    }

    #[test]
    fn test_published_proxy_tracks_latest_activation() {
        let sandbox = Sandbox::new(GlobalScope::new(), SandboxMode::Basic);
        assert!(sandbox.published_proxy().is_none());

        sandbox.activate("alpha").unwrap();
        sandbox.activate("beta").unwrap();
        assert_eq!(sandbox.published_proxy().unwrap().owner(), "beta");

        // Deactivating a non-published owner leaves the slot alone
        sandbox.deactivate("alpha");
        assert_eq!(sandbox.published_proxy().unwrap().owner(), "beta");

        sandbox.deactivate("beta");
        assert!(sandbox.published_proxy().is_none());
    }

    #[test]
    fn test_eval_without_evaluator() {
        let sandbox = Sandbox::new(GlobalScope::new(), SandboxMode::Enhanced);
        let proxy = sandbox.activate("alpha").unwrap();
        assert!(matches!(proxy.eval("x"), Err(HostError::EvalUnavailable)));
    }

    #[test]
    fn test_enhanced_mode_memoises_eval() {
        let eval = Arc::new(CountingEval::default());
        let sandbox =
            Sandbox::new(host_scope(), SandboxMode::Enhanced).with_evaluator(eval.clone());
        let proxy = sandbox.activate("alpha").unwrap();

        assert_eq!(proxy.eval("count").unwrap(), json!(1));
        proxy.set("count", json!(10));
        // Replayed verbatim even though the global changed
        assert_eq!(proxy.eval("count").unwrap(), json!(1));
        assert_eq!(eval.calls.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.session().memo_len(), 1);

        let params = vec!["a".to_string()];
        let f1 = proxy.construct_function(&params, "a").unwrap();
        let f2 = proxy.construct_function(&params, "a").unwrap();
        assert!(f1.same_as(&f2));
        assert_eq!(eval.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_basic_mode_does_not_memoise() {
        let eval = Arc::new(CountingEval::default());
        let sandbox = Sandbox::new(host_scope(), SandboxMode::Basic).with_evaluator(eval.clone());
        let proxy = sandbox.activate("alpha").unwrap();

        proxy.eval("count").unwrap();
        proxy.set("count", json!(10));
        assert_eq!(proxy.eval("count").unwrap(), json!(10));
        assert_eq!(eval.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_memo_cleared_on_deactivate() {
        let eval = Arc::new(CountingEval::default());
        let sandbox =
            Sandbox::new(host_scope(), SandboxMode::Enhanced).with_evaluator(eval.clone());
        let proxy = sandbox.activate("alpha").unwrap();
        proxy.eval("count").unwrap();
        assert_eq!(proxy.session().memo_len(), 1);

        sandbox.deactivate("alpha");
        assert_eq!(proxy.session().memo_len(), 0);

        let proxy = sandbox.activate("alpha").unwrap();
        proxy.eval("count").unwrap();
        assert_eq!(eval.calls.load(Ordering::SeqCst), 2);
    }
}
