use actix_web::web;

use crate::api::v1::{health, protocol};

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::basic::register(cfg, health::basic::ROUTE_PATH);
    health::live::register(cfg, health::live::ROUTE_PATH);
    protocol::schema::register(cfg, protocol::schema::ROUTE_PATH);
}
