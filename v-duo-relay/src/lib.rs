//! v-duo-relay：两人聊天室的实时中继
//! v-duo-relay: real-time relay for a two-party chat room

pub mod api;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod ws;

pub use error::{RelayError, RelayResult};
pub use server::RelayServer;
