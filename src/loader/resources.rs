//! Stylesheet and script insertion with per-app tagging

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::{Document, Element, NodeId};
use crate::error::{HostError, Result};

use super::fetch::AssetFetcher;
use super::runtime::{ModuleEnv, ScriptRuntime};

/// Attribute carrying the owning app's name on inserted nodes
pub const APP_ATTRIBUTE: &str = "data-micro-app";

/// A stylesheet node inserted for one app
#[derive(Debug, Clone, Serialize)]
pub struct StyleHandle {
    pub app: String,
    pub url: String,
    #[serde(skip)]
    pub node: NodeId,
    pub bytes: u64,
    pub loaded_at: DateTime<Utc>,
}

/// Fetches assets and inserts them into the document
pub struct ResourceLoader {
    document: Document,
    fetcher: Arc<dyn AssetFetcher>,
    runtime: Arc<dyn ScriptRuntime>,
    styles: Mutex<HashMap<String, StyleHandle>>,
    scripts: Mutex<HashMap<String, NodeId>>,
}

impl ResourceLoader {
    pub fn new(
        document: Document,
        fetcher: Arc<dyn AssetFetcher>,
        runtime: Arc<dyn ScriptRuntime>,
    ) -> Self {
        Self {
            document,
            fetcher,
            runtime,
            styles: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Fetch a stylesheet and link it into `head`, tagged with `app`.
    /// A second call for an app that already has a stylesheet does nothing.
    pub async fn load_style(&self, url: &str, app: &str) -> Result<()> {
        if self.styles.lock().contains_key(app) {
            debug!(app, url, "stylesheet already present");
            return Ok(());
        }

        let body = self.fetcher.fetch(url).await.map_err(|e| {
            warn!(app, url, error = %e, "stylesheet failed to load");
            HostError::ResourceLoad {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut styles = self.styles.lock();
        // Another load for the same app may have finished while we fetched
        if styles.contains_key(app) {
            return Ok(());
        }

        let node = self.document.append_to_head(
            Element::new("link")
                .with_attr("rel", "stylesheet")
                .with_attr("href", url)
                .with_attr(APP_ATTRIBUTE, app),
        );
        styles.insert(
            app.to_string(),
            StyleHandle {
                app: app.to_string(),
                url: url.to_string(),
                node,
                bytes: body.len() as u64,
                loaded_at: Utc::now(),
            },
        );

        info!(app, url, bytes = body.len(), "stylesheet loaded");
        Ok(())
    }

    /// Insert a module script reference and run it to completion
    pub async fn load_script(&self, url: &str, env: ModuleEnv) -> Result<()> {
        let app = env.app_name.clone();
        let node = self.document.append_to_head(
            Element::new("script")
                .with_attr("type", "module")
                .with_attr("src", url)
                .with_attr(APP_ATTRIBUTE, &app),
        );
        if let Some(stale) = self.scripts.lock().insert(app.clone(), node) {
            self.document.remove(stale);
        }

        debug!(app = %app, url, "executing module");
        self.runtime.run_module(url, env).await.map_err(|e| {
            warn!(app = %app, url, error = %e, "module failed");
            HostError::ResourceLoad {
                url: url.to_string(),
                reason: format!("{:#}", e),
            }
        })?;

        debug!(app = %app, url, "module finished");
        Ok(())
    }

    /// Remove the stylesheet recorded for `app`
    pub fn unload_style(&self, app: &str) -> bool {
        let Some(handle) = self.styles.lock().remove(app) else {
            return false;
        };
        self.document.remove(handle.node);
        info!(app, url = %handle.url, "stylesheet removed");
        true
    }

    /// Remove the script node recorded for `app`
    pub fn unload_script(&self, app: &str) -> bool {
        let Some(node) = self.scripts.lock().remove(app) else {
            return false;
        };
        self.document.remove(node);
        debug!(app, "script node removed");
        true
    }

    /// Stylesheet recorded for `app`
    pub fn style(&self, app: &str) -> Option<StyleHandle> {
        self.styles.lock().get(app).cloned()
    }

    /// Every recorded stylesheet, sorted by app name
    pub fn styles(&self) -> Vec<StyleHandle> {
        let mut handles: Vec<StyleHandle> = self.styles.lock().values().cloned().collect();
        handles.sort_by(|a, b| a.app.cmp(&b.app));
        handles
    }

    pub fn has_script(&self, app: &str) -> bool {
        self.scripts.lock().contains_key(app)
    }
}
