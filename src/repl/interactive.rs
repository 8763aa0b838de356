//! Interactive REPL implementation

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::config::HostManifest;
use crate::error::{HostError, Result};
use crate::host::{AppDescriptor, MicroHost};
use crate::output::{format_report, OutputFormat};
use crate::parser::parse_expression;
use crate::script::{eval_expr, to_text};

/// One line of REPL input
#[derive(Debug, Clone, PartialEq)]
enum ReplCommand {
    Load(Target),
    Mount(Target),
    Unmount(Target),
    Unload(Target),
    Status,
    Report,
    Doc,
    Globals,
    Set { key: String, expr: String },
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    All,
    App(String),
}

fn parse_line(line: &str) -> std::result::Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let target = |arg: Option<&str>| match arg {
        Some("all") => Ok(Target::All),
        Some(name) => Ok(Target::App(name.to_string())),
        None => Err(format!("usage: {} <name|all>", verb)),
    };

    let command = match verb.as_str() {
        "load" => ReplCommand::Load(target(words.next())?),
        "mount" => ReplCommand::Mount(target(words.next())?),
        "unmount" => ReplCommand::Unmount(target(words.next())?),
        "unload" => ReplCommand::Unload(target(words.next())?),
        "status" | "ls" => ReplCommand::Status,
        "report" => ReplCommand::Report,
        "doc" => ReplCommand::Doc,
        "globals" | "vars" => ReplCommand::Globals,
        "set" => {
            let rest = line.trim_start()[verb.len()..].trim();
            let (key, expr) = rest
                .split_once('=')
                .ok_or_else(|| "usage: set <key> = <expression>".to_string())?;
            ReplCommand::Set {
                key: key.trim().to_string(),
                expr: expr.trim().to_string(),
            }
        }
        "help" | "?" => ReplCommand::Help,
        "exit" | "quit" | "q" => ReplCommand::Exit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(command)
}

struct Session {
    manifest: HostManifest,
    host: MicroHost,
}

impl Session {
    fn targets(&self, target: &Target) -> Result<Vec<AppDescriptor>> {
        match target {
            Target::All => Ok(self.manifest.apps.clone()),
            Target::App(name) => self
                .manifest
                .app(name)
                .cloned()
                .map(|d| vec![d])
                .ok_or_else(|| HostError::NotFound(name.clone())),
        }
    }

    async fn execute(&self, command: ReplCommand) -> Result<()> {
        match command {
            ReplCommand::Load(target) => {
                for descriptor in self.targets(&target)? {
                    report(&descriptor.name, "loaded", self.host.load_app(&descriptor).await);
                }
            }
            ReplCommand::Mount(target) => {
                for descriptor in self.targets(&target)? {
                    report(&descriptor.name, "mounted", self.host.mount_app(&descriptor.name).await);
                }
            }
            ReplCommand::Unmount(target) => {
                for descriptor in self.targets(&target)? {
                    report(
                        &descriptor.name,
                        "unmounted",
                        self.host.unmount_app(&descriptor.name).await,
                    );
                }
            }
            ReplCommand::Unload(target) => {
                for descriptor in self.targets(&target)? {
                    report(
                        &descriptor.name,
                        "unloaded",
                        self.host.unload_app(&descriptor.name).await,
                    );
                }
            }
            ReplCommand::Status => {
                for descriptor in &self.manifest.apps {
                    let status = self.host.status(&descriptor.name);
                    println!(
                        "  {:<16} {:<13} sandbox: {}",
                        status.name,
                        status.state.to_string(),
                        if status.sandbox_active { "active" } else { "-" }
                    );
                }
            }
            ReplCommand::Report => {
                println!("{}", format_report(&self.host.report(), &OutputFormat::Human));
            }
            ReplCommand::Doc => {
                for line in self.host.document().outline() {
                    println!("{}", line);
                }
            }
            ReplCommand::Globals => {
                for (key, value) in self.host.scope().snapshot() {
                    println!("  {} = {}", key, value);
                }
            }
            ReplCommand::Set { key, expr } => {
                let expr = parse_expression(&expr)?;
                let scope = self.host.scope();
                let value = eval_expr(&expr, |k| scope.get(k));
                println!("  {} = {}", key, to_text(&value));
                scope.set(key, value);
            }
            ReplCommand::Help => print_help(),
            ReplCommand::Exit => {}
        }
        Ok(())
    }
}

fn report(name: &str, done: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => println!("  {} {}", name, done),
        Err(e) => eprintln!("  {}: {}", name, e),
    }
}

pub async fn run_repl(manifest: HostManifest, root: PathBuf) -> Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| HostError::Config(e.to_string()))?;

    println!("Microhost v{} - Interactive Mode", env!("CARGO_PKG_VERSION"));
    println!(
        "{} app(s) declared, assets from {}",
        manifest.apps.len(),
        root.display()
    );
    println!("Type 'help' for commands, 'exit' to quit\n");

    let host = manifest.build_host(&root);
    let session = Session { manifest, host };

    loop {
        match rl.readline("microhost> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match parse_line(line) {
                    Ok(ReplCommand::Exit) => {
                        println!("Goodbye!");
                        break;
                    }
                    Ok(command) => {
                        if let Err(e) = session.execute(command).await {
                            eprintln!("Error: {}\n", e);
                        }
                    }
                    Err(usage) => eprintln!("{}", usage),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"
Microhost Commands
==================

LIFECYCLE:
  load <name|all>                 - Fetch, sandbox, register and bootstrap
  mount <name|all>                - Run the mount hook
  unmount <name|all>              - Run the unmount hook, revert the sandbox
  unload <name|all>               - Drop everything held for an app

INSPECTION:
  status, ls                      - Lifecycle state per declared app
  report                          - Full host report
  doc                             - Outline of the host document
  globals, vars                   - Contents of the global scope

GLOBALS:
  set <key> = <expression>        - Write to the global scope

REPL Commands:
  help, ?                         - Show this help
  exit, quit, q                   - Exit REPL
"#
    );
}
