//! Data-channel event shapes exchanged with the realtime model.

pub mod client_events;
pub mod models;
pub mod server_events;
