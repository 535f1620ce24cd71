//! 可取消的收集事件流
//!
//! 一次收集产生若干 Progress 事件，最后恰好一个 Finished 事件。取消只关闭本地通道，
//! 不保证后端停止已开始的工作。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 单次收集失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// 通道建立失败，或在终态消息之前断开
    #[error("Collection connection failed: {0}")]
    Connection(String),

    /// 服务端明确返回 error
    #[error("Collection server error: {0}")]
    Server(String),

    #[error("Collection cancelled")]
    Cancelled,

    /// 无法解析的帧（记录日志后忽略，不会作为终态）
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// 收集终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    /// 已解析为绝对地址的下载链接
    Complete { artifact_url: String },
    Failed(CollectionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Progress(String),
    Finished(CollectionOutcome),
}

/// 收集事件流；Drop 时自动取消
pub struct CollectionStream {
    rx: mpsc::UnboundedReceiver<CollectionEvent>,
    cancel: CancellationToken,
}

impl CollectionStream {
    /// 返回流与生产端；生产端在 `cancel` 触发后应尽快关闭底层通道
    pub fn channel() -> (Self, mpsc::UnboundedSender<CollectionEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            Self {
                rx,
                cancel: cancel.clone(),
            },
            tx,
            cancel,
        )
    }

    /// 立即以给定终态结束的流
    pub fn finished(outcome: CollectionOutcome) -> Self {
        let (stream, tx, _) = Self::channel();
        let _ = tx.send(CollectionEvent::Finished(outcome));
        stream
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 消费整个流：进度交给回调，返回唯一终态。
    /// 生产端未发终态就结束，按连接失败处理。
    pub async fn into_outcome<F>(mut self, mut on_progress: F) -> CollectionOutcome
    where
        F: FnMut(&str),
    {
        while let Some(event) = self.next().await {
            match event {
                CollectionEvent::Progress(message) => on_progress(&message),
                CollectionEvent::Finished(outcome) => return outcome,
            }
        }
        CollectionOutcome::Failed(CollectionError::Connection(
            "channel closed without a terminal message".to_string(),
        ))
    }
}

impl Stream for CollectionStream {
    type Item = CollectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for CollectionStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_into_outcome_reports_progress_then_outcome() {
        let (stream, tx, _) = CollectionStream::channel();
        tx.send(CollectionEvent::Progress("a".into())).unwrap();
        tx.send(CollectionEvent::Progress("b".into())).unwrap();
        tx.send(CollectionEvent::Finished(CollectionOutcome::Complete {
            artifact_url: "http://h:1/x".into(),
        }))
        .unwrap();

        let mut seen = Vec::new();
        let outcome = stream.into_outcome(|m| seen.push(m.to_string())).await;
        assert_eq!(seen, vec!["a", "b"]);
        assert!(matches!(outcome, CollectionOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn test_closed_without_terminal_is_connection_failure() {
        let (stream, tx, _) = CollectionStream::channel();
        tx.send(CollectionEvent::Progress("a".into())).unwrap();
        drop(tx);

        let outcome = stream.into_outcome(|_| {}).await;
        assert!(matches!(
            outcome,
            CollectionOutcome::Failed(CollectionError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (stream, _tx, token) = CollectionStream::channel();
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
    }
}
