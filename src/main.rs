//! Microhost CLI - load, sandbox and mount micro-frontend sub-applications

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use microhost::cli::{Args, SubCommand};
use microhost::loader::DirFetcher;
use microhost::script::check_bundle;
use microhost::{format_checks, format_report, HostError, HostManifest, OutputFormat};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "microhost=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Read the manifest and work out where its assets live
fn open_manifest(path: &Path, root: Option<PathBuf>) -> microhost::Result<(HostManifest, PathBuf)> {
    let manifest = HostManifest::load(path)?;
    manifest.validate()?;
    let root = root.unwrap_or_else(|| manifest.asset_root(path));
    Ok((manifest, root))
}

async fn run(args: Args) -> microhost::Result<()> {
    let output_format = if args.json { OutputFormat::Json } else { OutputFormat::Human };

    match args.command {
        SubCommand::Run {
            manifest,
            root,
            apps,
            no_mount,
            unmount,
        } => {
            let (manifest, root) = open_manifest(&manifest, root)?;

            for name in &apps {
                if manifest.app(name).is_none() {
                    return Err(HostError::NotFound(name.clone()));
                }
            }
            let selected: Vec<_> = manifest
                .apps
                .iter()
                .filter(|a| apps.is_empty() || apps.contains(&a.name))
                .collect();

            let host = manifest.build_host(&root);
            let mut failed = Vec::new();

            for descriptor in &selected {
                let outcome = match host.load_app(descriptor).await {
                    Ok(()) if no_mount => Ok(()),
                    Ok(()) => host.mount_app(&descriptor.name).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    eprintln!("{}: {}", descriptor.name, e);
                    failed.push(descriptor.name.clone());
                }
            }

            if unmount {
                for descriptor in &selected {
                    if failed.contains(&descriptor.name) {
                        continue;
                    }
                    if let Err(e) = host.unmount_app(&descriptor.name).await {
                        failed.push(descriptor.name.clone());
                        eprintln!("{}: {}", descriptor.name, e);
                    }
                }
            }

            println!("{}", format_report(&host.report(), &output_format));

            if failed.is_empty() {
                Ok(())
            } else {
                Err(HostError::LoadFailed {
                    name: failed.join(", "),
                    reason: "see the report above".to_string(),
                })
            }
        }

        SubCommand::Check { manifest, root } => {
            let (manifest, root) = open_manifest(&manifest, root)?;
            let fetcher = DirFetcher::new(root);

            let mut checks = Vec::with_capacity(manifest.apps.len());
            for descriptor in &manifest.apps {
                checks.push(check_bundle(&fetcher, descriptor).await);
            }
            println!("{}", format_checks(&checks, &output_format));

            let failed = checks.iter().filter(|c| c.failed()).count();
            if failed > 0 {
                return Err(HostError::Config(format!(
                    "{} of {} bundles failed validation",
                    failed,
                    checks.len()
                )));
            }
            Ok(())
        }

        #[cfg(feature = "repl")]
        SubCommand::Repl { manifest, root } => {
            let (manifest, root) = open_manifest(&manifest, root)?;
            microhost::repl::run_repl(manifest, root).await
        }
        #[cfg(not(feature = "repl"))]
        SubCommand::Repl { .. } => {
            eprintln!("REPL support not enabled. Rebuild with --features repl");
            std::process::exit(1);
        }
    }
}
