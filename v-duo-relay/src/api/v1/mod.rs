pub mod health;
pub mod protocol;
