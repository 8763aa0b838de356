//! Output formatting

use crate::host::HostReport;
use crate::output::human::{format_checks_human, format_report_human};
use crate::output::json::{format_checks_json, format_report_json};
use crate::script::BundleCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

pub fn format_report(report: &HostReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => format_report_human(report),
        OutputFormat::Json => format_report_json(report),
    }
}

pub fn format_checks(checks: &[BundleCheck], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => format_checks_human(checks),
        OutputFormat::Json => format_checks_json(checks),
    }
}
