//! Human-readable output formatting

use bytesize::ByteSize;

use crate::host::HostReport;
use crate::script::BundleCheck;

pub fn format_report_human(report: &HostReport) -> String {
    let mut output = String::from("Sub-applications\n----------------\n");

    if report.apps.is_empty() {
        output.push_str("No sub-applications loaded\n");
    } else {
        output.push_str(&format!(
            "{:<16} {:<14} {:<16} {:<9} {}\n",
            "NAME", "STATE", "MOUNT", "SANDBOX", "GLOBALS WRITTEN"
        ));
        output.push_str(&"-".repeat(72));
        output.push('\n');
        for app in &report.apps {
            output.push_str(&format!(
                "{:<16} {:<14} {:<16} {:<9} {}\n",
                truncate(&app.name, 16),
                app.state.to_string(),
                truncate(app.mount_selector.as_deref().unwrap_or("-"), 16),
                if app.sandbox_active { "active" } else { "-" },
                if app.overlay_keys.is_empty() {
                    "-".to_string()
                } else {
                    app.overlay_keys.join(", ")
                }
            ));
        }
    }

    if !report.stylesheets.is_empty() {
        output.push_str("\nStylesheets\n-----------\n");
        for style in &report.stylesheets {
            output.push_str(&format!(
                "  {:<16} {:<24} {:>10}  loaded {}\n",
                truncate(&style.app, 16),
                truncate(&style.url, 24),
                ByteSize(style.bytes).to_string(),
                style.loaded_at.format("%H:%M:%S")
            ));
        }
    }

    if !report.mounts.is_empty() {
        output.push_str("\nMount points\n------------\n");
        for mount in &report.mounts {
            let text = if mount.text.is_empty() {
                "(empty)"
            } else {
                mount.text.as_str()
            };
            output.push_str(&format!("  {:<16} {}", mount.selector, text));
            if mount.loading {
                output.push_str("  [loading]");
            }
            output.push('\n');
        }
    }

    output.push_str("\nGlobals\n-------\n");
    for (key, value) in &report.globals {
        output.push_str(&format!("  {} = {}\n", key, value));
    }

    output.push_str(&format!(
        "\nSandbox mode: {} | Generated {}\n",
        report.sandbox_mode,
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    output
}

pub fn format_checks_human(checks: &[BundleCheck]) -> String {
    if checks.is_empty() {
        return "No sub-applications declared".to_string();
    }

    let mut output = String::new();
    for check in checks {
        let size = check
            .bytes
            .map(|b| ByteSize(b).to_string())
            .unwrap_or_else(|| "-".to_string());
        let verdict = if check.failed() {
            "FAILED"
        } else if check.issues.is_empty() {
            "ok"
        } else {
            "ok with warnings"
        };

        output.push_str(&format!(
            "{} ({}, {}): {}\n",
            check.app, check.script_url, size, verdict
        ));
        if let Some(error) = &check.error {
            output.push_str(&format!("  ERROR: {}\n", error));
        }
        for issue in &check.issues {
            output.push_str(&format!("  {}\n", issue));
        }
    }
    output
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
