pub mod basic;
pub mod live;
