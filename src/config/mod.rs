//! Host configuration and the JSON manifest the CLI reads

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{HostError, Result};
use crate::host::{AppDescriptor, MicroHost};
use crate::loader::{AssetFetcher, DirFetcher};
use crate::sandbox::SandboxMode;
use crate::script::{BundleRuntime, ExprEvaluator};

/// Default bound on how long a load waits for the module to register
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default text shown in a mount element while its app loads
pub const DEFAULT_FALLBACK_TEXT: &str = "Loading...";

/// Runtime settings of a [`MicroHost`](crate::host::MicroHost)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub registration_timeout: Duration,
    pub sandbox_mode: SandboxMode,
    pub fallback_text: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            sandbox_mode: SandboxMode::Basic,
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
        }
    }
}

impl HostConfig {
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn with_sandbox_mode(mut self, mode: SandboxMode) -> Self {
        self.sandbox_mode = mode;
        self
    }

    pub fn with_fallback_text(mut self, text: &str) -> Self {
        self.fallback_text = text.to_string();
        self
    }
}

/// The host manifest: which apps exist and how the host behaves
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostManifest {
    pub apps: Vec<AppDescriptor>,
    /// Asset root, relative to the manifest file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_text: Option<String>,
    /// Element ids created in the body; derived from `#id` selectors when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_points: Option<Vec<String>>,
}

impl HostManifest {
    /// Read and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            HostError::Config(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check every descriptor and that names are unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            app.validate()?;
            if !seen.insert(app.name.as_str()) {
                return Err(HostError::Config(format!(
                    "app '{}' is declared more than once",
                    app.name
                )));
            }
        }

        if self.registration_timeout_ms == Some(0) {
            return Err(HostError::Config(
                "registrationTimeoutMs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings for the host, defaults filled in
    pub fn host_config(&self) -> HostConfig {
        let mut config = HostConfig::default();
        if let Some(ms) = self.registration_timeout_ms {
            config.registration_timeout = Duration::from_millis(ms);
        }
        if let Some(mode) = self.sandbox {
            config.sandbox_mode = mode;
        }
        if let Some(text) = &self.fallback_text {
            config.fallback_text = text.clone();
        }
        config
    }

    /// Ids of the mount elements the page should contain
    pub fn mount_point_ids(&self) -> Vec<String> {
        if let Some(ids) = &self.mount_points {
            return ids.clone();
        }
        let mut ids: Vec<String> = Vec::new();
        for id in self.apps.iter().filter_map(AppDescriptor::mount_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Directory assets are served from
    pub fn asset_root(&self, manifest_path: &Path) -> PathBuf {
        let base = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => base.join(root),
            None => base,
        }
    }

    /// Descriptor by name
    pub fn app(&self, name: &str) -> Option<&AppDescriptor> {
        self.apps.iter().find(|a| a.name == name)
    }

    /// A host serving bundle scripts from `root`, with the manifest's mount
    /// points in its document
    pub fn build_host(&self, root: &Path) -> MicroHost {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(DirFetcher::new(root));
        let runtime = Arc::new(BundleRuntime::new(fetcher.clone()));
        MicroHost::new(self.host_config(), fetcher, runtime)
            .with_document(Document::with_mount_points(self.mount_point_ids()))
            .with_evaluator(Arc::new(ExprEvaluator))
    }
}
