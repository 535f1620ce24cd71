//! 编排 API 错误分类
//!
//! 控制器依赖这里的区分做状态转换：NotFound 不是错误而是「资源不存在」的信号；
//! Transient 可重试；Rejected / Decode 直接上抛。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 网络错误、超时、429、5xx
    #[error("Transient API error: {0}")]
    Transient(String),

    #[error("API request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    /// 409：同名资源已存在
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Rejected { status: 409, .. })
    }

    /// 按 HTTP 状态码分类；body 若是 Kubernetes `Status` 对象则取其 message
    pub fn from_status(status: u16, target: &str, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {}", status)
                } else {
                    body.trim().to_string()
                }
            });

        match status {
            404 => ApiError::NotFound(target.to_string()),
            429 | 500..=599 => ApiError::Transient(format!("{} ({})", message, status)),
            _ => ApiError::Rejected { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_404_is_not_found() {
        let err = ApiError::from_status(404, "daemonsets/tcpdump-capture-ds", "");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_5xx_and_429_are_transient() {
        assert!(ApiError::from_status(503, "x", "").is_transient());
        assert!(ApiError::from_status(500, "x", "boom").is_transient());
        assert!(ApiError::from_status(429, "x", "").is_transient());
    }

    #[test]
    fn test_other_4xx_rejected_with_status_message() {
        let body = r#"{"kind":"Status","status":"Failure","message":"daemonsets.apps \"x\" already exists","code":409}"#;
        let err = ApiError::from_status(409, "x", body);
        assert_eq!(
            err,
            ApiError::Rejected {
                status: 409,
                message: "daemonsets.apps \"x\" already exists".to_string(),
            }
        );
        assert!(err.is_conflict());
        assert!(!ApiError::from_status(403, "x", "").is_conflict());
    }

    #[test]
    fn test_plain_body_used_as_message() {
        let err = ApiError::from_status(403, "x", "forbidden\n");
        assert_eq!(err.to_string(), "API request rejected (403): forbidden");
    }
}
