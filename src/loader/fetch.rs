//! Asset fetching

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Retrieves the body of a script or stylesheet url
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> io::Result<String>;
}

/// Serves urls as files under a root directory
#[derive(Debug, Clone)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a url to a path under the root. Query strings and fragments are
    /// ignored; `..` segments are refused.
    pub fn resolve(&self, url: &str) -> io::Result<PathBuf> {
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_start_matches('/');

        if path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("empty asset path in '{}'", url),
            ));
        }

        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("'{}' escapes the asset root", url),
            ));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetFetcher for DirFetcher {
    async fn fetch(&self, url: &str) -> io::Result<String> {
        let path = self.resolve(url)?;
        debug!(url, path = %path.display(), "fetching asset");
        tokio::fs::read_to_string(&path).await
    }
}

/// In-memory url to body map. Counts fetches per url.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    assets: Mutex<HashMap<String, String>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, url: &str, body: &str) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&self, url: &str, body: &str) {
        self.assets.lock().insert(url.to_string(), body.to_string());
    }

    pub fn remove(&self, url: &str) -> bool {
        self.assets.lock().remove(url).is_some()
    }

    /// How many times `url` was requested, found or not
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> io::Result<String> {
        *self.fetches.lock().entry(url.to_string()).or_insert(0) += 1;
        self.assets.lock().get(url).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no asset at '{}'", url))
        })
    }
}
