//! WebSocket 收集客户端
//!
//! 每次收集建立一条新连接：发送任务 → 转发进度 → 收到终态后关闭连接。
//! 本层不重试，协议也不可续传；客户端无超时，一直等到终态或连接断开。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::message::{CollectionTask, ServerMessage};
use super::stream::{CollectionError, CollectionEvent, CollectionOutcome, CollectionStream};
use crate::config::CollectorSection;

/// 收集后端抽象
#[async_trait]
pub trait Collector: Send + Sync {
    /// 开始一次收集；连接失败也以流中的终态表示
    async fn collect(&self, task: CollectionTask) -> CollectionStream;
}

/// 固定地址的收集后端（不做服务发现）
#[derive(Debug, Clone)]
pub struct WsCollector {
    config: CollectorSection,
}

impl WsCollector {
    pub fn new(config: CollectorSection) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> String {
        let path = if self.config.path.starts_with('/') {
            self.config.path.clone()
        } else {
            format!("/{}", self.config.path)
        };
        format!("ws://{}:{}{}", self.config.host, self.config.port, path)
    }

    /// 服务端返回的相对 url 按同一 host:port 解析为下载地址
    pub fn resolve_artifact(&self, url: &str) -> Result<String, CollectionError> {
        let base = Url::parse(&format!("http://{}:{}/", self.config.host, self.config.port))
            .map_err(|e| CollectionError::Protocol(format!("invalid collector address: {}", e)))?;
        base.join(url)
            .map(|u| u.to_string())
            .map_err(|e| CollectionError::Protocol(format!("invalid artifact url {}: {}", url, e)))
    }

    async fn run(
        self,
        task: CollectionTask,
        tx: mpsc::UnboundedSender<CollectionEvent>,
        cancel: CancellationToken,
    ) {
        let outcome = self.exchange(&task, &tx, &cancel).await;
        match &outcome {
            CollectionOutcome::Complete { artifact_url } => {
                tracing::info!("Collection {} complete: {}", task.task_id, artifact_url)
            }
            CollectionOutcome::Failed(e) => tracing::warn!("Collection {} failed: {}", task.task_id, e),
        }
        let _ = tx.send(CollectionEvent::Finished(outcome));
    }

    async fn exchange(
        &self,
        task: &CollectionTask,
        tx: &mpsc::UnboundedSender<CollectionEvent>,
        cancel: &CancellationToken,
    ) -> CollectionOutcome {
        let endpoint = self.endpoint();
        tracing::info!("Connecting to collector {} for task {}", endpoint, task.task_id);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return CollectionOutcome::Failed(CollectionError::Cancelled),
            r = tokio_tungstenite::connect_async(endpoint.as_str()) => r,
        };
        let ws_stream = match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                return CollectionOutcome::Failed(CollectionError::Connection(format!(
                    "{}: {}",
                    endpoint, e
                )))
            }
        };
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let payload = match task.to_json() {
            Ok(p) => p,
            Err(e) => return CollectionOutcome::Failed(e),
        };
        if let Err(e) = ws_tx.send(WsMessage::Text(payload)).await {
            return CollectionOutcome::Failed(CollectionError::Connection(e.to_string()));
        }

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws_tx.close().await;
                    return CollectionOutcome::Failed(CollectionError::Cancelled);
                }
                frame = ws_rx.next() => frame,
            };

            let text = match frame {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return CollectionOutcome::Failed(CollectionError::Connection(
                        "channel closed before a terminal message".to_string(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return CollectionOutcome::Failed(CollectionError::Connection(e.to_string()))
                }
            };

            tracing::debug!("Collector frame: {}", text);
            match ServerMessage::parse(&text) {
                Ok(ServerMessage::Progress(message)) => {
                    let _ = tx.send(CollectionEvent::Progress(message));
                }
                Ok(ServerMessage::Complete { url }) => {
                    let _ = ws_tx.close().await;
                    return match self.resolve_artifact(&url) {
                        Ok(artifact_url) => CollectionOutcome::Complete { artifact_url },
                        Err(e) => CollectionOutcome::Failed(e),
                    };
                }
                Ok(ServerMessage::Error { message }) => {
                    let _ = ws_tx.close().await;
                    return CollectionOutcome::Failed(CollectionError::Server(message));
                }
                Err(e) => tracing::warn!("Ignoring collector frame: {}", e),
            }
        }
    }
}

#[async_trait]
impl Collector for WsCollector {
    async fn collect(&self, task: CollectionTask) -> CollectionStream {
        let (stream, tx, cancel) = CollectionStream::channel();
        tokio::spawn(self.clone().run(task, tx, cancel));
        stream
    }
}
