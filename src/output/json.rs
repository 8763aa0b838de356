//! JSON output formatting

use serde_json::{json, Value};

use crate::host::HostReport;
use crate::script::BundleCheck;

pub fn format_report_json(report: &HostReport) -> String {
    let data = serde_json::to_value(report).unwrap_or(json!(null));
    serde_json::to_string_pretty(&data).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_checks_json(checks: &[BundleCheck]) -> String {
    let items: Vec<Value> = checks
        .iter()
        .map(|c| serde_json::to_value(c).unwrap_or(json!(null)))
        .collect();
    serde_json::to_string_pretty(&json!({ "apps": items })).unwrap_or_else(|_| "{}".to_string())
}
