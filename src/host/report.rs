//! Snapshots of host state for display

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::loader::StyleHandle;
use crate::registry::AppState;
use crate::sandbox::SandboxMode;

/// What the host knows about one sub-application
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub name: String,
    pub state: AppState,
    pub mount_selector: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub sandbox_active: bool,
    /// Globals the app has written through its sandbox
    pub overlay_keys: Vec<String>,
    pub stylesheet: Option<String>,
}

/// Contents of one mount element
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    pub app: String,
    pub selector: String,
    pub text: String,
    /// The loading indicator is still shown
    pub loading: bool,
}

/// Everything `report` gathers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReport {
    pub generated_at: DateTime<Utc>,
    pub sandbox_mode: SandboxMode,
    pub apps: Vec<AppStatus>,
    pub stylesheets: Vec<StyleHandle>,
    pub mounts: Vec<MountInfo>,
    /// The real global scope, outside any sandbox
    pub globals: BTreeMap<String, Value>,
}

impl HostReport {
    pub fn app(&self, name: &str) -> Option<&AppStatus> {
        self.apps.iter().find(|a| a.name == name)
    }
}
