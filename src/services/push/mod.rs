pub mod channel;
pub mod ws;

pub use channel::{
    LoggingObserver, PushChannel, PushConnection, PushConnector, PushObserver, PushSignal, PushSignals, PushState,
};
pub use ws::WsConnector;
