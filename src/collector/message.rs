//! 收集协议消息定义
//!
//! 客户端发送一条任务消息；服务端推送若干进度消息，最后以 complete / error 结束。

use serde::{Deserialize, Serialize};

use super::CollectionError;

/// 需要收集抓包文件的 Pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectTarget {
    pub name: String,
    #[serde(rename = "nodeName")]
    pub node_name: String,
}

/// 一次收集任务；只存在于一次协议交换期间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTask {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "podsToCollect")]
    pub targets: Vec<CollectTarget>,
}

impl CollectionTask {
    /// 任务 ID 形如 `task-<毫秒时间戳>-<8 位随机>`
    pub fn new(targets: Vec<CollectTarget>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            task_id: format!("task-{}-{}", chrono::Utc::now().timestamp_millis(), &suffix[..8]),
            targets,
        }
    }

    pub fn to_json(&self) -> Result<String, CollectionError> {
        serde_json::to_string(self).map_err(|e| CollectionError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawServerMessage {
    status: Option<String>,
    url: Option<String>,
    message: Option<String>,
}

/// 服务端消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Progress(String),
    /// `url` 为相对路径
    Complete { url: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, CollectionError> {
        let raw: RawServerMessage =
            serde_json::from_str(text).map_err(|e| CollectionError::Protocol(e.to_string()))?;

        match raw.status.as_deref() {
            Some("complete") => raw
                .url
                .map(|url| ServerMessage::Complete { url })
                .ok_or_else(|| CollectionError::Protocol("complete message without url".to_string())),
            Some("error") => Ok(ServerMessage::Error {
                message: raw.message.unwrap_or_else(|| "unknown error".to_string()),
            }),
            Some(other) => Err(CollectionError::Protocol(format!("unknown status: {}", other))),
            None => raw
                .message
                .map(ServerMessage::Progress)
                .ok_or_else(|| CollectionError::Protocol(format!("unrecognized message: {}", text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_message_shape() {
        let task = CollectionTask::new(vec![CollectTarget {
            name: "p1".to_string(),
            node_name: "n1".to_string(),
        }]);
        let json: serde_json::Value = serde_json::from_str(&task.to_json().unwrap()).unwrap();
        assert_eq!(json["taskID"], task.task_id.as_str());
        assert_eq!(
            json["podsToCollect"],
            serde_json::json!([{ "name": "p1", "nodeName": "n1" }])
        );
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = CollectionTask::new(vec![]);
        let b = CollectionTask::new(vec![]);
        assert!(a.task_id.starts_with("task-"));
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn test_parse_server_messages() {
        assert_eq!(
            ServerMessage::parse(r#"{"message":"copying from n1"}"#).unwrap(),
            ServerMessage::Progress("copying from n1".to_string())
        );
        assert_eq!(
            ServerMessage::parse(r#"{"status":"complete","url":"/dl/abc"}"#).unwrap(),
            ServerMessage::Complete { url: "/dl/abc".to_string() }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"status":"error","message":"x"}"#).unwrap(),
            ServerMessage::Error { message: "x".to_string() }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse(r#"{"status":"complete"}"#).is_err());
        assert!(ServerMessage::parse(r#"{"status":"paused"}"#).is_err());
        assert!(ServerMessage::parse("{}").is_err());
    }
}
