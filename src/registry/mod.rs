//! Lifecycle registry for sub-applications

mod hook;
mod lifecycle;
mod manager;

pub use hook::RegistrationHook;
pub use lifecycle::{AppLifecycle, AppState};
pub use manager::{AppInfo, LifecycleRegistry, StateChange};
