//! Sandbox sessions and the interception object handed to sub-applications

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::scope::{is_truthy, GlobalScope, Value, ENVIRONMENT_KEY};

use super::eval::{function_key, CompiledFunction, DynamicEval, EvalMemo};

/// Isolation state for one active sub-application
#[derive(Debug)]
pub struct SandboxSession {
    owner: String,
    /// Every entry of the global scope at activation time
    baseline: BTreeMap<String, Value>,
    /// Every key the sub-application wrote while active
    overlay: Mutex<BTreeMap<String, Value>>,
    memo: Option<Mutex<EvalMemo>>,
    active: AtomicBool,
    activated_at: DateTime<Utc>,
}

impl SandboxSession {
    pub(crate) fn new(owner: &str, baseline: BTreeMap<String, Value>, memoize: bool) -> Self {
        Self {
            owner: owner.to_string(),
            baseline,
            overlay: Mutex::new(BTreeMap::new()),
            memo: memoize.then(|| Mutex::new(EvalMemo::default())),
            active: AtomicBool::new(true),
            activated_at: Utc::now(),
        }
    }

    /// Name of the owning sub-application
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// When the session was activated
    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    /// Whether the session has not been deactivated yet
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a key existed when the session was activated
    pub fn had_at_baseline(&self, key: &str) -> bool {
        self.baseline.contains_key(key)
    }

    /// Keys written during the session
    pub fn overlay_keys(&self) -> Vec<String> {
        self.overlay.lock().keys().cloned().collect()
    }

    /// Number of memoised evaluations
    pub fn memo_len(&self) -> usize {
        self.memo.as_ref().map_or(0, |m| m.lock().len())
    }

    /// Revert every overlaid key on the real scope and clear session state.
    /// Returns the number of keys reverted.
    pub(crate) fn revert(&self, scope: &GlobalScope) -> usize {
        self.active.store(false, Ordering::SeqCst);
        let overlay = std::mem::take(&mut *self.overlay.lock());

        for key in overlay.keys() {
            match self.baseline.get(key) {
                Some(original) => {
                    scope.set(key.clone(), original.clone());
                    debug!(app = %self.owner, key = %key, "restored baseline value");
                }
                None => {
                    scope.remove(key);
                    debug!(app = %self.owner, key = %key, "removed key added during session");
                }
            }
        }

        if let Some(memo) = &self.memo {
            memo.lock().clear();
        }

        overlay.len()
    }
}

/// Interception object standing in for the global scope.
///
/// Reads return the overlay value when present, otherwise the live global
/// value. Writes land in the overlay only and never reach the real scope.
#[derive(Clone)]
pub struct ScopeProxy {
    session: Arc<SandboxSession>,
    scope: GlobalScope,
    evaluator: Option<Arc<dyn DynamicEval>>,
}

impl ScopeProxy {
    pub(crate) fn new(
        session: Arc<SandboxSession>,
        scope: GlobalScope,
        evaluator: Option<Arc<dyn DynamicEval>>,
    ) -> Self {
        Self {
            session,
            scope,
            evaluator,
        }
    }

    /// Name of the sub-application this proxy belongs to
    pub fn owner(&self) -> &str {
        self.session.owner()
    }

    /// The session behind this proxy
    pub fn session(&self) -> &SandboxSession {
        &self.session
    }

    /// Read a key, overlay first
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.session.overlay.lock().get(key) {
            return Some(value.clone());
        }
        self.scope.get(key)
    }

    /// Write a key into the overlay. Returns `false` if the session is over.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if !self.session.is_active() {
            warn!(app = %self.owner(), key = %key, "write through deactivated sandbox ignored");
            return false;
        }
        self.session.overlay.lock().insert(key, value);
        true
    }

    /// Whether a key is visible through the proxy
    pub fn contains(&self, key: &str) -> bool {
        self.session.overlay.lock().contains_key(key) || self.scope.contains(key)
    }

    /// Whether the host has set the micro-app environment flag
    pub fn is_hosted(&self) -> bool {
        is_truthy(self.get(ENVIRONMENT_KEY).as_ref())
    }

    /// Keys written through this proxy so far
    pub fn overlay_keys(&self) -> Vec<String> {
        self.session.overlay_keys()
    }

    /// Evaluate source text, memoised per session in enhanced mode
    pub fn eval(&self, source: &str) -> Result<Value> {
        let evaluator = self.evaluator.as_ref().ok_or(HostError::EvalUnavailable)?;

        let memo = match &self.session.memo {
            Some(memo) if self.session.is_active() => memo,
            _ => return evaluator.evaluate(self, source),
        };

        if let Some(hit) = memo.lock().value(source) {
            debug!(app = %self.owner(), "eval memo hit");
            return Ok(hit);
        }

        let value = evaluator.evaluate(self, source)?;
        memo.lock().remember_value(source, value.clone());
        Ok(value)
    }

    /// Build a function from source text, memoised per session in enhanced mode
    pub fn construct_function(&self, params: &[String], body: &str) -> Result<CompiledFunction> {
        let evaluator = self.evaluator.as_ref().ok_or(HostError::EvalUnavailable)?;

        let memo = match &self.session.memo {
            Some(memo) if self.session.is_active() => memo,
            _ => return evaluator.construct_function(self, params, body),
        };

        let key = function_key(params, body);
        if let Some(hit) = memo.lock().function(&key) {
            debug!(app = %self.owner(), "function memo hit");
            return Ok(hit);
        }

        let function = evaluator.construct_function(self, params, body)?;
        memo.lock().remember_function(&key, function.clone());
        Ok(function)
    }
}

impl fmt::Debug for ScopeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeProxy")
            .field("owner", &self.owner())
            .field("active", &self.session.is_active())
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}
