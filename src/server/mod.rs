pub mod host;
pub mod manager;
pub(crate) mod registry;
mod supervisor;

pub use host::ToolHost;
pub use manager::{ServerManager, ServerStatus, StartupFailure, StartupReport};
