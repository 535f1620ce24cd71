//! 会话错误类型
//!
//! 所有失败都在控制器的公开操作边界被捕获，写入会话的唯一错误槽，不会向外传播。

use thiserror::Error;

use crate::orchestration::ApiError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 状态检查重试耗尽（网络 / 5xx 类）
    #[error("Status check failed: {0}")]
    TransientApi(ApiError),

    #[error("Failed to create namespace {namespace}: {source}")]
    NamespaceCreationFailed {
        namespace: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to start capture: {0}")]
    SessionStart(#[source] ApiError),

    #[error("Failed to stop capture: {0}")]
    SessionStop(#[source] ApiError),

    #[error("Collection connection failed: {0}")]
    CollectionConnectionFailed(String),

    #[error("Collection server error: {0}")]
    CollectionServer(String),

    /// 非致命：抓包文件已拿到，只是节点上的残留没有清理干净
    #[error("Cleanup failed: {0}")]
    CleanupFailed(#[source] ApiError),

    /// 非预期的编排 API 错误，原样透出
    #[error(transparent)]
    Orchestration(ApiError),
}

impl SessionError {
    /// 状态查询失败：可重试类归为 TransientApi，其余原样透出
    pub fn from_status_failure(err: ApiError) -> Self {
        if err.is_transient() {
            SessionError::TransientApi(err)
        } else {
            SessionError::Orchestration(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestration_error_is_transparent() {
        let api = ApiError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        };
        let err = SessionError::Orchestration(api.clone());
        assert_eq!(err.to_string(), api.to_string());
    }

    #[test]
    fn test_status_failure_classification() {
        assert!(matches!(
            SessionError::from_status_failure(ApiError::Transient("x".into())),
            SessionError::TransientApi(_)
        ));
        assert!(matches!(
            SessionError::from_status_failure(ApiError::Decode("x".into())),
            SessionError::Orchestration(_)
        ));
    }
}
