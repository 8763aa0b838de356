//! Bundle script execution
//!
//! A bundle runs once at load time against its sandbox proxy. `REGISTER`
//! hands the host a [`ScriptedLifecycle`] whose hooks run later against the
//! same proxy.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::document::{Document, NodeId};
use crate::loader::{AssetFetcher, ModuleEnv, ScriptRuntime};
use crate::parser::{parse_script, HookKind, Registration, Statement};
use crate::registry::{AppLifecycle, RegistrationHook};
use crate::sandbox::ScopeProxy;

use super::evaluator::{eval_expr, to_text};

/// Runs bundle scripts fetched through an [`AssetFetcher`]
pub struct BundleRuntime {
    fetcher: Arc<dyn AssetFetcher>,
}

impl BundleRuntime {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ScriptRuntime for BundleRuntime {
    async fn run_module(&self, url: &str, env: ModuleEnv) -> anyhow::Result<()> {
        let source = self
            .fetcher
            .fetch(url)
            .await
            .with_context(|| format!("cannot fetch bundle '{}'", url))?;
        let script = parse_script(&source)?;

        debug!(app = %env.app_name, url, statements = script.statements.len(), "running bundle");
        let frame = Frame {
            scope: &env.scope,
            document: &env.document,
            mount: None,
            register: Some(&env.register),
        };
        frame.run(&script.statements)
    }
}

/// What a block of statements can reach while it runs
struct Frame<'a> {
    scope: &'a ScopeProxy,
    document: &'a Document,
    /// Mount selector, only inside mount and unmount hooks
    mount: Option<&'a str>,
    /// Registration capability, only at the top level of a bundle
    register: Option<&'a RegistrationHook>,
}

impl Frame<'_> {
    fn run(&self, statements: &[Statement]) -> anyhow::Result<()> {
        statements.iter().try_for_each(|s| self.exec(s))
    }

    fn exec(&self, statement: &Statement) -> anyhow::Result<()> {
        match statement {
            Statement::Let { name, value } => {
                let value = eval_expr(value, |k| self.scope.get(k));
                self.scope.set(name.clone(), value);
            }
            Statement::Eval { source, target } => {
                let value = self.scope.eval(source)?;
                self.scope.set(target.clone(), value);
            }
            Statement::Print(expr) => {
                let value = eval_expr(expr, |k| self.scope.get(k));
                info!(app = %self.scope.owner(), "{}", to_text(&value));
            }
            Statement::Render(expr) => {
                let node = self.mount_node("RENDER")?;
                let value = eval_expr(expr, |k| self.scope.get(k));
                self.document.set_text(node, &to_text(&value));
            }
            Statement::Clear => {
                let node = self.mount_node("CLEAR")?;
                self.document.set_text(node, "");
            }
            Statement::Fail(message) => bail!("{}", message),
            Statement::IfHosted {
                then_branch,
                else_branch,
            } => {
                if self.scope.is_hosted() {
                    self.run(then_branch)?;
                } else {
                    self.run(else_branch)?;
                }
            }
            Statement::Register(registration) => {
                let hook = self
                    .register
                    .ok_or_else(|| anyhow!("REGISTER is only allowed at the top level"))?;
                let lifecycle =
                    ScriptedLifecycle::new(registration, self.scope.clone(), self.document.clone());
                // Rejections are logged by the hook and do not abort the bundle
                if let Err(e) = hook.register(&registration.name, Arc::new(lifecycle)) {
                    debug!(app = %registration.name, error = %e, "bundle registration skipped");
                }
            }
        }
        Ok(())
    }

    fn mount_node(&self, keyword: &str) -> anyhow::Result<NodeId> {
        let selector = self
            .mount
            .ok_or_else(|| anyhow!("{} needs a mount point", keyword))?;
        self.document
            .query_selector(selector)?
            .ok_or_else(|| anyhow!("mount point '{}' not found", selector))
    }
}

/// Lifecycle whose hooks are bundle-script blocks
pub struct ScriptedLifecycle {
    bootstrap: Vec<Statement>,
    mount: Vec<Statement>,
    unmount: Vec<Statement>,
    scope: ScopeProxy,
    document: Document,
    mounted_at: Mutex<Option<String>>,
}

impl ScriptedLifecycle {
    pub fn new(registration: &Registration, scope: ScopeProxy, document: Document) -> Self {
        let body = |kind| registration.hook(kind).unwrap_or_default().to_vec();
        Self {
            bootstrap: body(HookKind::Bootstrap),
            mount: body(HookKind::Mount),
            unmount: body(HookKind::Unmount),
            scope,
            document,
            mounted_at: Mutex::new(None),
        }
    }

    fn frame<'a>(&'a self, mount: Option<&'a str>) -> Frame<'a> {
        Frame {
            scope: &self.scope,
            document: &self.document,
            mount,
            register: None,
        }
    }
}

#[async_trait]
impl AppLifecycle for ScriptedLifecycle {
    async fn bootstrap(&self) -> anyhow::Result<()> {
        self.frame(None).run(&self.bootstrap)
    }

    async fn mount(&self, mount_selector: &str) -> anyhow::Result<()> {
        self.frame(Some(mount_selector)).run(&self.mount)?;
        *self.mounted_at.lock() = Some(mount_selector.to_string());
        Ok(())
    }

    async fn unmount(&self) -> anyhow::Result<()> {
        let mounted_at = self.mounted_at.lock().clone();
        self.frame(mounted_at.as_deref()).run(&self.unmount)?;
        *self.mounted_at.lock() = None;
        Ok(())
    }
}
