//! 会话存储抽象层
//!
//! 控制器持有一个可注入的存储；进程重启后状态不保留，由 `recover()` 重新查询集群得出。

use tokio::sync::watch;

use super::SessionSnapshot;

/// 会话存储接口
pub trait SessionStore: Send + Sync {
    /// 当前快照
    fn snapshot(&self) -> SessionSnapshot;

    /// 原子地修改快照并通知订阅者
    fn update(&self, apply: &mut dyn FnMut(&mut SessionSnapshot));

    /// 订阅快照变化
    fn subscribe(&self) -> watch::Receiver<SessionSnapshot>;
}

/// 内存会话存储（基于 watch 通道）
pub struct MemorySessionStore {
    tx: watch::Sender<SessionSnapshot>,
}

impl MemorySessionStore {
    pub fn new(initial: SessionSnapshot) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }
}

impl SessionStore for MemorySessionStore {
    fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SessionSnapshot)) {
        self.tx.send_modify(|s| apply(s));
    }

    fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let store = MemorySessionStore::new(SessionSnapshot::new("img"));
        let mut rx = store.subscribe();

        store.update(&mut |s| s.phase = SessionPhase::Idle);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, SessionPhase::Idle);
        assert_eq!(store.snapshot().phase, SessionPhase::Idle);
    }
}
