pub mod event;
pub mod host;
pub mod queue;
pub mod sampler;
pub mod session;
pub mod state;
pub mod time;
