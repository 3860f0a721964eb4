//! Two-phase plugin lifecycle.
//!
//! Every plugin registers its event listeners before any plugin boots, so
//! boot-time side effects always find their listeners in place.

pub mod manager;
pub mod plugin;

pub use manager::PluginManager;
pub use plugin::{BootContext, Plugin};
