//! Registry of known sub-applications and their lifecycle state
//!
//! The registry is the single source of truth for which sub-applications the
//! host knows about. Each entry moves through
//! `Loaded -> Bootstrapped -> Mounted -> Unmounted`; the entry is deleted once
//! unmounted so the next load of the same name starts fresh.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{HostError, Result};

use super::lifecycle::{AppLifecycle, AppState};

/// One recorded state change
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub state: AppState,
    pub at: DateTime<Utc>,
}

/// Snapshot of a registered sub-application
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub state: AppState,
    pub mount_selector: String,
    pub registered_at: DateTime<Utc>,
    pub history: Vec<StateChange>,
}

struct RegisteredApp {
    lifecycle: Arc<dyn AppLifecycle>,
    mount_selector: String,
    state: AppState,
    registered_at: DateTime<Utc>,
    history: Vec<StateChange>,
}

impl RegisteredApp {
    fn set_state(&mut self, state: AppState) {
        self.state = state;
        self.history.push(StateChange {
            state,
            at: Utc::now(),
        });
    }

    fn info(&self, name: &str) -> AppInfo {
        AppInfo {
            name: name.to_string(),
            state: self.state,
            mount_selector: self.mount_selector.clone(),
            registered_at: self.registered_at,
            history: self.history.clone(),
        }
    }
}

/// Which states a transition may start from
type Precondition = fn(AppState, &dyn AppLifecycle) -> bool;

/// Maps sub-application names to their lifecycle and drives transitions
#[derive(Default)]
pub struct LifecycleRegistry {
    apps: Mutex<HashMap<String, RegisteredApp>>,
}

impl LifecycleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sub-application. Rejects a name that is already registered.
    pub fn register(
        &self,
        name: &str,
        lifecycle: Arc<dyn AppLifecycle>,
        mount_selector: &str,
    ) -> Result<()> {
        let mut apps = self.apps.lock();
        if apps.contains_key(name) {
            return Err(HostError::Registration(format!(
                "'{}' is already registered",
                name
            )));
        }

        let now = Utc::now();
        apps.insert(
            name.to_string(),
            RegisteredApp {
                lifecycle,
                mount_selector: mount_selector.to_string(),
                state: AppState::Loaded,
                registered_at: now,
                history: vec![StateChange {
                    state: AppState::Loaded,
                    at: now,
                }],
            },
        );

        info!(app = name, mount = mount_selector, "sub-application registered");
        Ok(())
    }

    /// Run the bootstrap hook. `Loaded -> Bootstrapped`.
    pub async fn bootstrap(&self, name: &str) -> Result<()> {
        let (lifecycle, _, previous) = self.begin(
            name,
            "bootstrap",
            AppState::Bootstrapping,
            |state, _| state == AppState::Loaded,
        )?;

        match lifecycle.bootstrap().await {
            Ok(()) => {
                self.finish(name, AppState::Bootstrapped);
                info!(app = name, "sub-application bootstrapped");
                Ok(())
            }
            Err(source) => Err(self.fail(name, previous, "bootstrap", source)),
        }
    }

    /// Run the mount hook with the registered selector. `Bootstrapped -> Mounted`,
    /// or `Loaded -> Mounted` when the app declares bootstrap optional.
    pub async fn mount(&self, name: &str) -> Result<()> {
        let (lifecycle, selector, previous) =
            self.begin(name, "mount", AppState::Mounting, |state, lifecycle| {
                state == AppState::Bootstrapped
                    || (state == AppState::Loaded && lifecycle.bootstrap_optional())
            })?;

        match lifecycle.mount(&selector).await {
            Ok(()) => {
                self.finish(name, AppState::Mounted);
                info!(app = name, mount = %selector, "sub-application mounted");
                Ok(())
            }
            Err(source) => Err(self.fail(name, previous, "mount", source)),
        }
    }

    /// Run the unmount hook and delete the entry. `Mounted -> Unmounted`.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        let (lifecycle, _, previous) = self.begin(
            name,
            "unmount",
            AppState::Unmounting,
            |state, _| state == AppState::Mounted,
        )?;

        match lifecycle.unmount().await {
            Ok(()) => {
                let mut apps = self.apps.lock();
                if let Some(app) = apps.get_mut(name) {
                    app.set_state(AppState::Unmounted);
                }
                apps.remove(name);
                info!(app = name, "sub-application unmounted");
                Ok(())
            }
            Err(source) => Err(self.fail(name, previous, "unmount", source)),
        }
    }

    /// Delete an entry regardless of state, without running hooks
    pub fn remove(&self, name: &str) -> Option<AppInfo> {
        let removed = self.apps.lock().remove(name)?;
        info!(app = name, state = %removed.state, "sub-application removed from registry");
        Some(removed.info(name))
    }

    /// Current state; `Unloaded` for unknown names
    pub fn state(&self, name: &str) -> AppState {
        self.apps
            .lock()
            .get(name)
            .map_or(AppState::Unloaded, |app| app.state)
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.apps.lock().contains_key(name)
    }

    /// Snapshot of one entry
    pub fn info(&self, name: &str) -> Option<AppInfo> {
        self.apps.lock().get(name).map(|app| app.info(name))
    }

    /// Snapshots of every entry, sorted by name
    pub fn list(&self) -> Vec<AppInfo> {
        let apps = self.apps.lock();
        let mut infos: Vec<AppInfo> = apps.iter().map(|(name, app)| app.info(name)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Number of registered sub-applications
    pub fn len(&self) -> usize {
        self.apps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.lock().is_empty()
    }

    /// Check the precondition and move into the in-flight state.
    /// Returns the lifecycle, mount selector and the state to restore on failure.
    fn begin(
        &self,
        name: &str,
        operation: &'static str,
        during: AppState,
        allowed: Precondition,
    ) -> Result<(Arc<dyn AppLifecycle>, String, AppState)> {
        let mut apps = self.apps.lock();
        let Some(app) = apps.get_mut(name) else {
            warn!(app = name, operation, "sub-application not found");
            return Err(HostError::NotFound(name.to_string()));
        };

        if !allowed(app.state, app.lifecycle.as_ref()) {
            warn!(app = name, operation, state = %app.state, "lifecycle transition rejected");
            return Err(HostError::LifecycleState {
                name: name.to_string(),
                operation,
                state: app.state,
            });
        }

        let previous = app.state;
        app.set_state(during);
        Ok((Arc::clone(&app.lifecycle), app.mount_selector.clone(), previous))
    }

    fn finish(&self, name: &str, state: AppState) {
        if let Some(app) = self.apps.lock().get_mut(name) {
            app.set_state(state);
        }
    }

    fn fail(
        &self,
        name: &str,
        previous: AppState,
        phase: &'static str,
        source: anyhow::Error,
    ) -> HostError {
        self.finish(name, previous);
        warn!(app = name, phase, error = %source, "lifecycle hook failed");
        HostError::Hook {
            name: name.to_string(),
            phase,
            source,
        }
    }
}
