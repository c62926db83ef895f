pub mod config;
pub mod coordinator;
pub mod media;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod view;
