//! Client-side telemetry agent: buffers game events, delivers them over a
//! durable bulk channel and a best-effort push channel, and summarises
//! frame rate on a fixed interval.

pub mod config;
pub mod error;
pub mod kernel;
pub mod services;

// Re-export the pieces an embedding host touches directly
pub use config::AgentConfig;
pub use error::TelemetryError;
pub use kernel::event::{kinds, ClientInfo, Event, Fixation, SeqRating, StimulusShown, TaskResult};
pub use kernel::host::{Connectivity, FrameClock, IntervalFrameClock, Lifecycle, ManualConnectivity, PageLifecycle};
pub use kernel::queue::FlushOutcome;
pub use kernel::session::{Session, SessionBuilder};
pub use kernel::state::SessionState;
pub use kernel::time::{Clock, SystemClock};
pub use services::push::WsConnector;
