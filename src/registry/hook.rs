//! The registration capability handed to sub-application modules

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{HostError, Result};

use super::lifecycle::AppLifecycle;
use super::manager::LifecycleRegistry;

struct PendingRegistration {
    mount_selector: String,
    ready: oneshot::Sender<()>,
}

/// Lets a module register its lifecycle and nothing else.
///
/// The host announces which names it is waiting for with [`expect`]; a
/// registration for a name nobody is waiting on is rejected. A hook handed
/// to a module is [`scoped`] to the name that module is loaded as.
///
/// [`expect`]: RegistrationHook::expect
/// [`scoped`]: RegistrationHook::scoped
#[derive(Clone)]
pub struct RegistrationHook {
    registry: Arc<LifecycleRegistry>,
    pending: Arc<Mutex<HashMap<String, PendingRegistration>>>,
    only: Option<Arc<str>>,
}

impl RegistrationHook {
    pub(crate) fn new(registry: Arc<LifecycleRegistry>) -> Self {
        Self {
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            only: None,
        }
    }

    /// A hook sharing the same waits that only accepts `name`
    pub(crate) fn scoped(&self, name: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            pending: self.pending.clone(),
            only: Some(Arc::from(name)),
        }
    }

    /// Start waiting for `name`. The receiver fires once the module registers.
    pub(crate) fn expect(&self, name: &str, mount_selector: &str) -> oneshot::Receiver<()> {
        let (ready, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(
            name.to_string(),
            PendingRegistration {
                mount_selector: mount_selector.to_string(),
                ready,
            },
        );
        if previous.is_some() {
            debug!(app = name, "replaced stale registration wait");
        }
        rx
    }

    /// Stop waiting for `name`
    pub(crate) fn forget(&self, name: &str) -> bool {
        self.pending.lock().remove(name).is_some()
    }

    /// Whether the host is waiting for `name` to register
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.lock().contains_key(name)
    }

    /// Register a lifecycle under `name`.
    ///
    /// Rejected when the name is already registered, when no load is waiting
    /// for it, or when the hook is scoped to another name.
    pub fn register(&self, name: &str, lifecycle: Arc<dyn AppLifecycle>) -> Result<()> {
        if let Some(only) = self.only.as_deref().filter(|only| *only != name) {
            let reason = format!("a module loaded as '{}' cannot register '{}'", only, name);
            warn!(app = name, %reason, "registration rejected");
            return Err(HostError::Registration(reason));
        }

        let pending = self.pending.lock().remove(name);

        let Some(pending) = pending else {
            let reason = if self.registry.contains(name) {
                format!("'{}' is already registered", name)
            } else {
                format!("no load is waiting for '{}'", name)
            };
            warn!(app = name, %reason, "registration rejected");
            return Err(HostError::Registration(reason));
        };

        if let Err(e) = self
            .registry
            .register(name, lifecycle, &pending.mount_selector)
        {
            warn!(app = name, error = %e, "registration rejected");
            return Err(e);
        }

        // The waiting load may have been cancelled already
        let _ = pending.ready.send(());
        Ok(())
    }
}

impl std::fmt::Debug for RegistrationHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pending: Vec<String> = self.pending.lock().keys().cloned().collect();
        pending.sort();
        f.debug_struct("RegistrationHook")
            .field("only", &self.only)
            .field("pending", &pending)
            .finish()
    }
}
