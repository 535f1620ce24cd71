//! Kubernetes REST 网关（reqwest）
//!
//! 直接访问 API Server 或 `kubectl proxy`；可选 Bearer token。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;

use super::{ApiError, OrchestrationApi, ResourceKind};
use crate::config::ClusterSection;

/// 基于 HTTP 的编排 API 客户端
pub struct KubeHttpClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl KubeHttpClient {
    /// 按 [cluster] 段构建；token 优先取配置值，其次读 token_file
    pub fn from_config(cfg: &ClusterSection) -> Result<Self, ApiError> {
        let token = match (&cfg.token, &cfg.token_file) {
            (Some(t), _) => Some(t.trim().to_string()),
            (None, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .map_err(|e| {
                        ApiError::Config(format!("Cannot read token file {}: {}", path.display(), e))
                    })?
                    .trim()
                    .to_string(),
            ),
            (None, None) => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .map_err(|e| ApiError::Transient(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: cfg.api_server.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder, target: &str) -> Result<String, ApiError> {
        let response = request.send().await.map_err(|e| {
            // 连接失败、超时等都视为可重试
            ApiError::Transient(format!("{}: {}", target, e))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transient(format!("Failed to read response: {}", e)))?;

        if status.is_success() {
            Ok(body)
        } else {
            tracing::debug!("{} {} -> {}", target, status, body);
            Err(ApiError::from_status(status.as_u16(), target, &body))
        }
    }

    fn decode(body: &str) -> Result<Value, ApiError> {
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OrchestrationApi for KubeHttpClient {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value, ApiError> {
        let path = kind.item_path(namespace, name);
        let body = self.send(self.request(Method::GET, &path), &path).await?;
        Self::decode(&body)
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, body: &Value) -> Result<Value, ApiError> {
        let path = kind.collection_path(namespace);
        let request = self
            .request(Method::POST, &path)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        let body = self.send(request, &path).await?;
        Self::decode(&body)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ApiError> {
        let path = kind.item_path(namespace, name);
        self.send(self.request(Method::DELETE, &path), &path).await?;
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Value>, ApiError> {
        let path = kind.collection_path(namespace);
        // 不带 resourceVersion：API Server 走一致性读而非 watch cache
        let request = self
            .request(Method::GET, &path)
            .query(&[("labelSelector", label_selector)])
            .header(CACHE_CONTROL, "no-cache");
        let body = self.send(request, &path).await?;
        let list = Self::decode(&body)?;
        match list.get("items") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(ApiError::Decode(format!("items is not an array: {}", other))),
        }
    }
}
