pub mod server;

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod registry;
pub mod types;

pub use crate::bus::Bus;
pub use crate::config::Config;
pub use crate::error::{CoreError, CoreResult};
pub use crate::orchestrator::{Orchestrator, Workflow, WorkflowExecution, WorkflowStep};
pub use crate::registry::ToolRegistry;
