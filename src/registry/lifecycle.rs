//! The lifecycle contract every sub-application implements

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle functions a sub-application hands to the host when it registers
#[async_trait]
pub trait AppLifecycle: Send + Sync {
    /// One-time initialisation before the first mount
    async fn bootstrap(&self) -> anyhow::Result<()>;

    /// Render into the element matched by `mount_selector`
    async fn mount(&self, mount_selector: &str) -> anyhow::Result<()>;

    /// Tear down whatever `mount` created
    async fn unmount(&self) -> anyhow::Result<()>;

    /// Whether `mount` may run without a prior `bootstrap`
    fn bootstrap_optional(&self) -> bool {
        false
    }
}

/// Lifecycle state of a sub-application as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    /// Not known to the host
    Unloaded,
    /// Resources are being fetched or registration is awaited
    Loading,
    /// Registered, bootstrap not yet run
    Loaded,
    Bootstrapping,
    Bootstrapped,
    Mounting,
    Mounted,
    Unmounting,
    /// Terminal; the entry is removed right after
    Unmounted,
}

impl AppState {
    /// A lifecycle hook is currently running
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            AppState::Loading | AppState::Bootstrapping | AppState::Mounting | AppState::Unmounting
        )
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppState::Unloaded => "unloaded",
            AppState::Loading => "loading",
            AppState::Loaded => "loaded",
            AppState::Bootstrapping => "bootstrapping",
            AppState::Bootstrapped => "bootstrapped",
            AppState::Mounting => "mounting",
            AppState::Mounted => "mounted",
            AppState::Unmounting => "unmounting",
            AppState::Unmounted => "unmounted",
        };
        write!(f, "{}", s)
    }
}
