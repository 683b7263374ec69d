// 通用基础模块 / Common infrastructure modules
pub mod config;
pub mod tracing;
