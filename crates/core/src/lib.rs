//! Runtime for a single-agent actor-critic loop: request lifecycle,
//! background task execution, and interval scheduling built on top of
//! `agentcore-providers` (Model Client transport) and `agentcore-context`
//! (history window enforcement).

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod history;
pub mod model_client;
pub mod request_context;
pub mod scheduler;
pub mod state_machine;
pub mod task_manager;
pub mod tool_gateway;

pub use cancel::{CancelMap, CancelToken};
pub use checkpoint::{CheckpointSnapshot, CheckpointStore};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use event_bus::{Event, EventBus, Topic};
pub use history::HistoryStore;
pub use model_client::{Answer, AskFormat, AskOptions, ModelClient};
pub use request_context::RequestContext;
pub use scheduler::{ScheduleRecord, ScheduleStatus, Scheduler};
pub use state_machine::{AgentOutcome, AgentStateMachine};
pub use task_manager::{TaskManager, TaskRecord, TaskStatus};
pub use tool_gateway::{ToolGateway, ToolHandler};

/// Installs a JSON-formatted `tracing-subscriber` reading filter directives
/// from `RUST_LOG` (falling back to `info`). Safe to call more than once --
/// only the first call actually installs a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
}
