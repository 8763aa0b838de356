//! Sub-application descriptors

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::Selector;
use crate::error::{HostError, Result};

/// What the host needs to load one sub-application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub name: String,
    pub script_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_url: Option<String>,
    pub mount_selector: String,
}

fn is_valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").ok())
        .as_ref()
        .map(|r| r.is_match(name))
        .unwrap_or(false)
}

impl AppDescriptor {
    pub fn new(name: &str, script_url: &str, mount_selector: &str) -> Self {
        Self {
            name: name.to_string(),
            script_url: script_url.to_string(),
            style_url: None,
            mount_selector: mount_selector.to_string(),
        }
    }

    pub fn with_style(mut self, style_url: &str) -> Self {
        self.style_url = Some(style_url.to_string());
        self
    }

    /// Reject descriptors the host cannot act on
    pub fn validate(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(HostError::InvalidDescriptor(format!(
                "name '{}' must start with a letter and contain only letters, digits, '-' or '_'",
                self.name
            )));
        }

        if self.script_url.trim().is_empty() {
            return Err(HostError::InvalidDescriptor(format!(
                "'{}' has an empty scriptUrl",
                self.name
            )));
        }

        if let Some(style) = &self.style_url {
            if style.trim().is_empty() {
                return Err(HostError::InvalidDescriptor(format!(
                    "'{}' has an empty styleUrl",
                    self.name
                )));
            }
        }

        Selector::parse(&self.mount_selector).map_err(|e| {
            HostError::InvalidDescriptor(format!("'{}' mountSelector: {}", self.name, e))
        })?;

        Ok(())
    }

    /// Element id of a plain `#id` mount selector
    pub fn mount_id(&self) -> Option<String> {
        Selector::parse(&self.mount_selector)
            .ok()
            .and_then(|s| s.as_id().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let json = r##"{"name":"alpha","scriptUrl":"/a.js","styleUrl":"/a.css","mountSelector":"#alpha"}"##;
        let d: AppDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(
            d,
            AppDescriptor::new("alpha", "/a.js", "#alpha").with_style("/a.css")
        );
        assert_eq!(d.mount_id().as_deref(), Some("alpha"));
    }

    #[test]
    fn test_style_is_optional() {
        let json = r##"{"name":"beta","scriptUrl":"/b.js","mountSelector":".slot"}"##;
        let d: AppDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.style_url.is_none());
        assert!(d.mount_id().is_none());
        d.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(AppDescriptor::new("9lives", "/a.js", "#a").validate().is_err());
        assert!(AppDescriptor::new("has space", "/a.js", "#a").validate().is_err());
        assert!(AppDescriptor::new("alpha", " ", "#a").validate().is_err());
        assert!(AppDescriptor::new("alpha", "/a.js", "div > p").validate().is_err());
        assert!(AppDescriptor::new("alpha", "/a.js", "#a")
            .with_style("")
            .validate()
            .is_err());
        AppDescriptor::new("app_2-x", "/a.js", "#a").validate().unwrap();
    }
}
