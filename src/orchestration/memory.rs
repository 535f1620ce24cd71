//! 内存编排 API（用于测试与离线演示，无需集群）
//!
//! 保存 Namespace 与 DaemonSet；Pod 列表按 DaemonSet 模板 label 为每个节点合成一个 Pod。
//! 支持按操作注入失败，并记录每次调用（含 tokio 时钟时间戳），便于断言调用顺序与延迟。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ApiError, OrchestrationApi, ResourceKind};

/// 可注入失败的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    Get,
    Create,
    Delete,
    List,
}

/// 一次调用记录
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub op: ApiOp,
    pub kind: ResourceKind,
    /// get / delete 为资源名，create 为清单中的 metadata.name，list 为 selector
    pub target: String,
    pub at: Instant,
}

#[derive(Default)]
struct Inner {
    namespaces: BTreeSet<String>,
    daemonsets: BTreeMap<(String, String), Value>,
    nodes: Vec<String>,
    pod_phase: String,
    failures: HashMap<(ApiOp, ResourceKind), VecDeque<ApiError>>,
    calls: Vec<ApiCall>,
}

/// 内存集群
pub struct MemoryOrchestrator {
    inner: Mutex<Inner>,
}

impl MemoryOrchestrator {
    /// 以给定节点名创建空集群
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(Inner {
                nodes: nodes.into_iter().map(Into::into).collect(),
                pod_phase: "Running".to_string(),
                ..Default::default()
            }),
        }
    }

    /// 让接下来 `times` 次 (op, kind) 调用返回 `err`
    pub async fn fail_next(&self, op: ApiOp, kind: ResourceKind, err: ApiError, times: usize) {
        let mut inner = self.inner.lock().await;
        let queue = inner.failures.entry((op, kind)).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    pub async fn set_pod_phase(&self, phase: &str) {
        self.inner.lock().await.pod_phase = phase.to_string();
    }

    pub async fn add_namespace(&self, name: &str) {
        self.inner.lock().await.namespaces.insert(name.to_string());
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.inner.lock().await.namespaces.contains(name)
    }

    pub async fn has_daemonset(&self, namespace: &str, name: &str) -> bool {
        self.inner
            .lock()
            .await
            .daemonsets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub async fn daemonset(&self, namespace: &str, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .await
            .daemonsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.inner.lock().await.calls.clone()
    }

    /// 只取某类操作的调用
    pub async fn calls_of(&self, op: ApiOp, kind: ResourceKind) -> Vec<ApiCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.op == op && c.kind == kind)
            .collect()
    }

    fn record(inner: &mut Inner, op: ApiOp, kind: ResourceKind, target: &str) -> Result<(), ApiError> {
        inner.calls.push(ApiCall {
            op,
            kind,
            target: target.to_string(),
            at: Instant::now(),
        });
        match inner.failures.get_mut(&(op, kind)).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// `a=b,c=d` 形式的 equality selector
fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            Some((k.trim().to_string(), v.trim_start_matches('=').trim().to_string()))
        })
        .collect()
}

fn template_labels(ds: &Value) -> BTreeMap<String, String> {
    ds.pointer("/spec/template/metadata/labels")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl OrchestrationApi for MemoryOrchestrator {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value, ApiError> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, ApiOp::Get, kind, name)?;
        let path = kind.item_path(namespace, name);
        match kind {
            ResourceKind::Namespace if inner.namespaces.contains(name) => Ok(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name },
            })),
            ResourceKind::DaemonSet => inner
                .daemonsets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or(ApiError::NotFound(path)),
            _ => Err(ApiError::NotFound(path)),
        }
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, body: &Value) -> Result<Value, ApiError> {
        let mut inner = self.inner.lock().await;
        let name = body
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::Rejected {
                status: 422,
                message: "metadata.name is required".to_string(),
            })?
            .to_string();
        Self::record(&mut inner, ApiOp::Create, kind, &name)?;

        match kind {
            ResourceKind::Namespace => {
                if !inner.namespaces.insert(name.clone()) {
                    return Err(ApiError::Rejected {
                        status: 409,
                        message: format!("namespaces \"{}\" already exists", name),
                    });
                }
            }
            ResourceKind::DaemonSet => {
                if !inner.namespaces.contains(namespace) {
                    return Err(ApiError::NotFound(format!("namespaces/{}", namespace)));
                }
                let key = (namespace.to_string(), name.clone());
                if inner.daemonsets.contains_key(&key) {
                    return Err(ApiError::Rejected {
                        status: 409,
                        message: format!("daemonsets.apps \"{}\" already exists", name),
                    });
                }
                inner.daemonsets.insert(key, body.clone());
            }
            ResourceKind::Pod => {
                return Err(ApiError::Rejected {
                    status: 405,
                    message: "pods are managed by daemonsets".to_string(),
                })
            }
        }
        Ok(body.clone())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, ApiOp::Delete, kind, name)?;
        let removed = match kind {
            ResourceKind::Namespace => inner.namespaces.remove(name),
            ResourceKind::DaemonSet => inner
                .daemonsets
                .remove(&(namespace.to_string(), name.to_string()))
                .is_some(),
            ResourceKind::Pod => false,
        };
        if removed {
            Ok(())
        } else {
            Err(ApiError::NotFound(kind.item_path(namespace, name)))
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Value>, ApiError> {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, ApiOp::List, kind, label_selector)?;
        if kind != ResourceKind::Pod {
            return Ok(Vec::new());
        }

        let wanted = parse_selector(label_selector);
        let mut pods = Vec::new();
        for ((ns, ds_name), ds) in &inner.daemonsets {
            if ns != namespace {
                continue;
            }
            let labels = template_labels(ds);
            if !wanted.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                continue;
            }
            for node in &inner.nodes {
                pods.push(json!({
                    "metadata": {
                        "name": format!("{}-{}", ds_name, node),
                        "namespace": ns,
                        "uid": format!("uid-{}-{}", ds_name, node),
                        "labels": labels,
                    },
                    "spec": { "nodeName": node },
                    "status": { "phase": inner.pod_phase },
                }));
            }
        }
        Ok(pods)
    }
}
