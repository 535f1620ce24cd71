//! 会话状态定义：阶段、节点状态表、对外快照
//!
//! 渲染层只持有 SessionSnapshot；「加载中」是与阶段正交的布尔标记。

use std::fmt;

use serde_json::Value;

use super::SessionError;
use crate::download::DownloadReady;

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// 首次状态检查完成前
    Unknown,
    Idle,
    Running,
    StoppingOnly,
    StoppingAndCollecting,
    Error,
}

impl SessionPhase {
    /// 过渡阶段只能由发起它的操作结束
    pub fn is_transitional(&self) -> bool {
        matches!(self, SessionPhase::StoppingOnly | SessionPhase::StoppingAndCollecting)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Unknown => "unknown",
            SessionPhase::Idle => "idle",
            SessionPhase::Running => "running",
            SessionPhase::StoppingOnly => "stopping",
            SessionPhase::StoppingAndCollecting => "stopping-and-collecting",
            SessionPhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 单个抓包 Pod 的状态（每次轮询整体替换）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCaptureStatus {
    pub pod_name: String,
    pub node_name: String,
    /// 编排 API 报告的 Pod phase，原样保存
    pub runtime_phase: String,
}

impl NodeCaptureStatus {
    pub fn from_pod(pod: &Value) -> Self {
        let text = |pointer: &str| {
            pod.pointer(pointer)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            pod_name: text("/metadata/name"),
            node_name: text("/spec/nodeName"),
            runtime_phase: text("/status/phase"),
        }
    }
}

/// 对外可见的会话快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub loading: bool,
    pub filter: String,
    pub image: String,
    pub nodes: Vec<NodeCaptureStatus>,
    /// 收集过程中的可读进度
    pub progress: Option<String>,
    pub last_error: Option<SessionError>,
    pub download: Option<DownloadReady>,
    /// 最后一次生效的请求序号，旧于此的状态检查结果会被丢弃
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn new(image: &str) -> Self {
        Self {
            phase: SessionPhase::Unknown,
            loading: false,
            filter: String::new(),
            image: image.to_string(),
            nodes: Vec::new(),
            progress: None,
            last_error: None,
            download: None,
            revision: 0,
        }
    }
}

/// 操作被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// 已有 start / stop / collect 在进行中
    Busy,
    InvalidPhase(SessionPhase),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Busy => write!(f, "another operation is in flight"),
            Rejection::InvalidPhase(phase) => write!(f, "not allowed while {}", phase),
        }
    }
}

/// 公开操作的回执；失败细节只通过快照的错误槽暴露
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Completed,
    Failed,
    Rejected(Rejection),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_from_pod() {
        let pod = serde_json::json!({
            "metadata": { "name": "tcpdump-capture-ds-abcde" },
            "spec": { "nodeName": "worker-1" },
            "status": { "phase": "Pending" },
        });
        let status = NodeCaptureStatus::from_pod(&pod);
        assert_eq!(status.pod_name, "tcpdump-capture-ds-abcde");
        assert_eq!(status.node_name, "worker-1");
        assert_eq!(status.runtime_phase, "Pending");
    }

    #[test]
    fn test_unscheduled_pod_has_empty_node() {
        let pod = serde_json::json!({ "metadata": { "name": "p" } });
        let status = NodeCaptureStatus::from_pod(&pod);
        assert_eq!(status.node_name, "");
        assert_eq!(status.runtime_phase, "");
    }

    #[test]
    fn test_initial_snapshot() {
        let s = SessionSnapshot::new("img:tag");
        assert_eq!(s.phase, SessionPhase::Unknown);
        assert!(s.nodes.is_empty());
        assert_eq!(s.image, "img:tag");
    }
}
