//! 脚本化收集后端（用于测试，无需收集服务）
//!
//! 每次 collect 取出一段预置事件脚本原样回放；「挂起」脚本在回放后一直等到被取消。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::client::Collector;
use super::message::CollectionTask;
use super::stream::{CollectionError, CollectionEvent, CollectionOutcome, CollectionStream};

struct Script {
    events: Vec<CollectionEvent>,
    hang: bool,
}

/// 预置脚本的收集后端
#[derive(Default)]
pub struct ScriptedCollector {
    scripts: Mutex<VecDeque<Script>>,
    tasks: Mutex<Vec<(CollectionTask, Instant)>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段脚本；不含 Finished 时流直接结束
    pub async fn push_script(&self, events: Vec<CollectionEvent>) {
        self.scripts.lock().await.push_back(Script { events, hang: false });
    }

    /// 回放后挂起，直到流被取消才以 Cancelled 结束
    pub async fn push_hanging(&self, events: Vec<CollectionEvent>) {
        self.scripts.lock().await.push_back(Script { events, hang: true });
    }

    /// 常用脚本：一条进度后成功
    pub async fn push_complete(&self, artifact_url: &str) {
        self.push_script(vec![
            CollectionEvent::Progress("collecting".to_string()),
            CollectionEvent::Finished(CollectionOutcome::Complete {
                artifact_url: artifact_url.to_string(),
            }),
        ])
        .await;
    }

    pub async fn push_server_error(&self, message: &str) {
        self.push_script(vec![CollectionEvent::Finished(CollectionOutcome::Failed(
            CollectionError::Server(message.to_string()),
        ))])
        .await;
    }

    /// 收到的任务及调用时刻（tokio 时钟）
    pub async fn tasks(&self) -> Vec<(CollectionTask, Instant)> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn collect(&self, task: CollectionTask) -> CollectionStream {
        self.tasks.lock().await.push((task, Instant::now()));

        let script = self.scripts.lock().await.pop_front();
        let Some(script) = script else {
            return CollectionStream::finished(CollectionOutcome::Failed(
                CollectionError::Connection("no collector script".to_string()),
            ));
        };

        let (stream, tx, cancel) = CollectionStream::channel();
        for event in script.events {
            let _ = tx.send(event);
        }
        if script.hang {
            tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = tx.send(CollectionEvent::Finished(CollectionOutcome::Failed(
                    CollectionError::Cancelled,
                )));
            });
        }
        stream
    }
}
