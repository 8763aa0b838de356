//! Host-facing API: descriptors, the orchestrator and its reports

mod descriptor;
mod orchestrator;
mod report;

pub use descriptor::AppDescriptor;
pub use orchestrator::{MicroHost, LOADING_ATTRIBUTE};
pub use report::{AppStatus, HostReport, MountInfo};
