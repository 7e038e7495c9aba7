pub mod capability;
pub mod cli;
pub mod message_tracing;
pub mod models;
pub mod providers;
