pub mod client;

pub use client::{BulkTransport, HttpBulkTransport, UnloadBeacon};
