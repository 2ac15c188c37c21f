pub mod http;
pub mod push;
