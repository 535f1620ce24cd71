//! 抓包会话集成测试：内存编排 API + 本地 WebSocket 收集服务，走完整的 start → collect → cleanup

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use kubecap::collector::WsCollector;
use kubecap::config::AppConfig;
use kubecap::download::RecordingSink;
use kubecap::orchestration::{ApiOp, MemoryOrchestrator, ResourceKind};
use kubecap::session::{
    MemorySessionStore, OperationStatus, SessionController, SessionPhase, SessionSnapshot,
};

fn fast_config(collector_port: u16) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.collector.port = collector_port;
    cfg.timing.status_retry_delay_ms = 20;
    cfg.timing.recheck_delay_ms = 50;
    cfg.timing.cleanup_settle_ms = 100;
    cfg
}

async fn wait_for<F>(rx: &mut watch::Receiver<SessionSnapshot>, mut done: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| done(s))).await;
    waited
        .expect("timed out waiting for session state")
        .expect("session store dropped")
        .clone()
}

/// 单连接收集服务：收到任务后回一条进度和一个完成消息，返回收到的任务 JSON
async fn spawn_collector_server() -> (u16, tokio::task::JoinHandle<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let request = match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            other => panic!("unexpected first frame: {:?}", other),
        };
        ws.send(WsMessage::Text(r#"{"message":"packing 2 files"}"#.to_string()))
            .await
            .unwrap();
        ws.send(WsMessage::Text(
            r#"{"status":"complete","url":"/download/bundle.tar.gz"}"#.to_string(),
        ))
        .await
        .unwrap();
        let _ = ws.close(None).await;
        serde_json::from_str(&request).unwrap()
    });
    (port, handle)
}

#[tokio::test]
async fn test_capture_collect_and_cleanup() {
    let (port, server) = spawn_collector_server().await;
    let cfg = fast_config(port);

    let api = Arc::new(MemoryOrchestrator::with_nodes(["worker-1", "worker-2", "worker-3"]));
    let sink = Arc::new(RecordingSink::new());
    let controller = SessionController::new(
        &cfg,
        api.clone(),
        Arc::new(WsCollector::new(cfg.collector.clone())),
        sink.clone(),
        Arc::new(MemorySessionStore::new(SessionSnapshot::new(&cfg.capture.image))),
    );
    let mut rx = controller.subscribe();

    assert_eq!(controller.recover().await, OperationStatus::Completed);
    assert_eq!(controller.snapshot().phase, SessionPhase::Idle);

    let filter = "host 10.0.0.1 and 'port 53'";
    assert_eq!(
        controller.start(filter, &cfg.capture.image).await,
        OperationStatus::Completed
    );
    let running = wait_for(&mut rx, |s| s.phase == SessionPhase::Running && !s.loading).await;
    assert_eq!(running.nodes.len(), 3);
    assert_eq!(running.filter, filter);

    assert_eq!(controller.stop_and_collect().await, OperationStatus::Completed);

    let request = server.await.unwrap();
    assert!(request["taskID"].as_str().unwrap().starts_with("task-"));
    assert_eq!(request["podsToCollect"].as_array().unwrap().len(), 3);
    assert_eq!(request["podsToCollect"][2]["nodeName"], "worker-3");

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].url,
        format!("http://127.0.0.1:{}/download/bundle.tar.gz", port)
    );

    let done = wait_for(&mut rx, |s| s.phase == SessionPhase::Idle && !s.loading).await;
    assert!(done.last_error.is_none());
    assert!(done.nodes.is_empty());

    let creates = api.calls_of(ApiOp::Create, ResourceKind::DaemonSet).await;
    let deletes = api.calls_of(ApiOp::Delete, ResourceKind::DaemonSet).await;
    assert_eq!(
        creates.iter().map(|c| c.target.as_str()).collect::<Vec<_>>(),
        vec!["tcpdump-capture-ds", "tcpdump-cleanup-ds"]
    );
    assert_eq!(
        deletes.iter().map(|c| c.target.as_str()).collect::<Vec<_>>(),
        vec!["tcpdump-capture-ds", "tcpdump-cleanup-ds"]
    );
    assert!(deletes[1].at.duration_since(creates[1].at) >= Duration::from_millis(100));
    assert!(!api.has_daemonset("kubexm-capture", "tcpdump-cleanup-ds").await);
}

#[tokio::test]
async fn test_collector_unreachable_keeps_session_running() {
    // 绑定后立即释放，得到一个大概率无人监听的端口
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let cfg = fast_config(port);

    let api = Arc::new(MemoryOrchestrator::with_nodes(["worker-1"]));
    let controller = SessionController::new(
        &cfg,
        api.clone(),
        Arc::new(WsCollector::new(cfg.collector.clone())),
        Arc::new(RecordingSink::new()),
        Arc::new(MemorySessionStore::new(SessionSnapshot::new(&cfg.capture.image))),
    );
    let mut rx = controller.subscribe();

    controller.recover().await;
    controller.start("", &cfg.capture.image).await;
    wait_for(&mut rx, |s| s.phase == SessionPhase::Running && !s.loading).await;

    assert_eq!(controller.stop_and_collect().await, OperationStatus::Failed);
    let s = controller.snapshot();
    assert_eq!(s.phase, SessionPhase::Running);
    assert!(s.last_error.is_some());
    assert!(api.has_daemonset("kubexm-capture", "tcpdump-capture-ds").await);
    assert!(api.calls_of(ApiOp::Delete, ResourceKind::DaemonSet).await.is_empty());
}
