//! 编排 API 抽象
//!
//! 所有后端（HTTP / 内存）实现 OrchestrationApi：按资源类型的 get / create / delete / list。

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::ApiError;

/// 控制器用到的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// 集群级资源，namespace 参数被忽略
    Namespace,
    DaemonSet,
    Pod,
}

impl ResourceKind {
    /// 集合路径（create / list）
    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            ResourceKind::Namespace => "/api/v1/namespaces".to_string(),
            ResourceKind::DaemonSet => format!("/apis/apps/v1/namespaces/{}/daemonsets", namespace),
            ResourceKind::Pod => format!("/api/v1/namespaces/{}/pods", namespace),
        }
    }

    /// 单个资源路径（get / delete）
    pub fn item_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::DaemonSet => write!(f, "daemonset"),
            ResourceKind::Pod => write!(f, "pod"),
        }
    }
}

/// 编排 API 网关 trait
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value, ApiError>;

    async fn create(&self, kind: ResourceKind, namespace: &str, body: &Value) -> Result<Value, ApiError>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ApiError>;

    /// 按 label selector 列出资源，必须绕过缓存读取最新状态
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Value>, ApiError>;
}
