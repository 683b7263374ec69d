use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use schemars::schema_for;
use v::response::{respond_any, respond_error};

use crate::domain::ClientEvent;

pub const ROUTE_PATH: &str = "/v1/protocol/schema";

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(protocol_schema_handle)));
}

// 入站事件 JSON Schema / JSON schema of inbound events
pub async fn protocol_schema_handle() -> impl Responder {
    match serde_json::to_value(schema_for!(ClientEvent)) {
        Ok(schema) => respond_any(StatusCode::OK, schema),
        Err(e) => respond_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
