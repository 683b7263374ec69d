pub mod calls;
pub mod delivery;
pub mod health;
pub mod notifier;
pub mod retention;
pub mod sync;
