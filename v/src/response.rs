use actix_web::{http::StatusCode, HttpResponse};

// 通用 HTTP 响应封装 / Generic HTTP response helpers

/// 结构体自动转 JSON，失败则原样文本 / JSON from any serializable value, debug text as fallback
pub fn respond_any<T: serde::Serialize + std::fmt::Debug>(
    code: StatusCode,
    data: T,
) -> HttpResponse {
    match serde_json::to_value(&data) {
        Ok(v) => HttpResponse::build(code).json(v),
        Err(_) => HttpResponse::build(code)
            .content_type("text/plain; charset=utf-8")
            .body(format!("{:?}", data)),
    }
}

/// 统一错误体 / Uniform error body
pub fn respond_error(code: StatusCode, message: impl Into<String>) -> HttpResponse {
    respond_any(code, serde_json::json!({ "error": message.into() }))
}
