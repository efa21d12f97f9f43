pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod messages;
pub mod node;
pub mod outcome;
pub mod raft;
pub mod store;
pub mod trace;
