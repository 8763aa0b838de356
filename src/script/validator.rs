//! Bundle validation
//!
//! Checks a bundle before the host runs it: registration shape and where
//! mount-only statements appear.

use std::collections::HashSet;

use serde::Serialize;

use crate::host::AppDescriptor;
use crate::loader::AssetFetcher;
use crate::parser::{parse_script, HookKind, Registration, Script, Statement};

/// A problem found in a bundle
#[derive(Debug, Clone, Serialize)]
pub struct BundleIssue {
    /// 1-based index of the top-level statement
    pub statement: Option<usize>,
    pub message: String,
    pub severity: ValidationSeverity,
}

/// Severity level for validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for BundleIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            ValidationSeverity::Error => "ERROR",
            ValidationSeverity::Warning => "WARNING",
        };
        if let Some(n) = self.statement {
            write!(f, "{} (statement {}): {}", prefix, n, self.message)
        } else {
            write!(f, "{}: {}", prefix, self.message)
        }
    }
}

/// Outcome of checking one declared sub-application's bundle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCheck {
    pub app: String,
    pub script_url: String,
    /// Size of the fetched bundle
    pub bytes: Option<u64>,
    pub issues: Vec<BundleIssue>,
    /// Fetch or parse failure; no issues are reported then
    pub error: Option<String>,
}

impl BundleCheck {
    pub fn failed(&self) -> bool {
        self.error.is_some() || has_errors(&self.issues)
    }
}

/// Validation options
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Name the bundle must register under
    pub expected_name: Option<String>,
}

impl ValidationOptions {
    pub fn expecting(name: &str) -> Self {
        Self {
            expected_name: Some(name.to_string()),
        }
    }
}

/// Where a statement sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    TopLevel,
    Hook(HookKind),
}

struct Checker<'a> {
    options: &'a ValidationOptions,
    issues: Vec<BundleIssue>,
    registered: HashSet<String>,
    index: usize,
}

/// Validate a bundle for correctness
pub fn validate_bundle(script: &Script, options: &ValidationOptions) -> Vec<BundleIssue> {
    let mut checker = Checker {
        options,
        issues: Vec::new(),
        registered: HashSet::new(),
        index: 0,
    };

    for (i, statement) in script.statements.iter().enumerate() {
        checker.index = i + 1;
        checker.statement(statement, Place::TopLevel);
    }

    if checker.registered.is_empty() {
        checker.issues.push(BundleIssue {
            statement: None,
            message: "Bundle never calls REGISTER; the host will time out waiting for it"
                .to_string(),
            severity: ValidationSeverity::Warning,
        });
    }

    checker.issues
}

impl Checker<'_> {
    fn push(&mut self, severity: ValidationSeverity, message: String) {
        self.issues.push(BundleIssue {
            statement: Some(self.index),
            message,
            severity,
        });
    }

    fn statement(&mut self, statement: &Statement, place: Place) {
        match statement {
            Statement::Render(_) | Statement::Clear => match place {
                Place::TopLevel | Place::Hook(HookKind::Bootstrap) => self.push(
                    ValidationSeverity::Error,
                    format!(
                        "{} has no mount point outside MOUNT and UNMOUNT hooks",
                        statement.keyword()
                    ),
                ),
                Place::Hook(_) => {}
            },
            Statement::IfHosted {
                then_branch,
                else_branch,
            } => {
                for s in then_branch.iter().chain(else_branch) {
                    self.statement(s, place);
                }
            }
            Statement::Register(registration) => match place {
                Place::TopLevel => self.registration(registration),
                Place::Hook(kind) => self.push(
                    ValidationSeverity::Error,
                    format!("REGISTER inside an ON {} hook is never reached", kind),
                ),
            },
            _ => {}
        }
    }

    fn registration(&mut self, registration: &Registration) {
        let name = &registration.name;

        if let Some(expected) = &self.options.expected_name {
            if name != expected {
                self.push(
                    ValidationSeverity::Error,
                    format!("Bundle registers '{}' but is loaded as '{}'", name, expected),
                );
            }
        }

        if !self.registered.insert(name.clone()) {
            self.push(
                ValidationSeverity::Warning,
                format!("'{}' is registered more than once; later calls are rejected", name),
            );
        }

        let mut seen = HashSet::new();
        for hook in &registration.hooks {
            if !seen.insert(hook.kind) {
                self.push(
                    ValidationSeverity::Error,
                    format!("Duplicate ON {} hook for '{}'", hook.kind, name),
                );
            }
            for s in &hook.body {
                self.statement(s, Place::Hook(hook.kind));
            }
        }

        if !seen.contains(&HookKind::Mount) {
            self.push(
                ValidationSeverity::Warning,
                format!("'{}' has no ON MOUNT hook and will render nothing", name),
            );
        }
    }
}

/// Fetch, parse and validate the bundle of one descriptor
pub async fn check_bundle(fetcher: &dyn AssetFetcher, descriptor: &AppDescriptor) -> BundleCheck {
    let mut check = BundleCheck {
        app: descriptor.name.clone(),
        script_url: descriptor.script_url.clone(),
        bytes: None,
        issues: Vec::new(),
        error: None,
    };

    if let Err(e) = descriptor.validate() {
        check.error = Some(e.to_string());
        return check;
    }

    let source = match fetcher.fetch(&descriptor.script_url).await {
        Ok(source) => source,
        Err(e) => {
            check.error = Some(format!("cannot fetch {}: {}", descriptor.script_url, e));
            return check;
        }
    };
    check.bytes = Some(source.len() as u64);

    if let Some(style) = &descriptor.style_url {
        if let Err(e) = fetcher.fetch(style).await {
            check.error = Some(format!("cannot fetch {}: {}", style, e));
            return check;
        }
    }

    match parse_script(&source) {
        Ok(script) => {
            check.issues =
                validate_bundle(&script, &ValidationOptions::expecting(&descriptor.name));
        }
        Err(e) => check.error = Some(e.to_string()),
    }
    check
}

/// Check if a bundle has any validation errors (not just warnings)
pub fn has_errors(issues: &[BundleIssue]) -> bool {
    issues
        .iter()
        .any(|e| e.severity == ValidationSeverity::Error)
}
