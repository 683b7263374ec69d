pub mod heartbeat;
pub mod retention;
