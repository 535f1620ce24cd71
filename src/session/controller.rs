//! 会话控制器：抓包会话的状态机
//!
//! 负责：向编排 API 提交 / 删除抓包与清理 DaemonSet，按固定策略轮询状态，
//! 并驱动收集协议走完一次 stop-and-collect。所有失败都在这里收敛到快照的错误槽。
//!
//! 并发模型：同一时刻只允许一个 start / stop / collect 在进行（busy 守卫）；
//! 状态检查可以随时发起，每次检查领取一个单调递增序号，结果只有在序号新于
//! 最后一次生效的请求时才写回，过期结果直接丢弃。

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::policy::{RetryPolicy, Timings};
use super::state::{NodeCaptureStatus, OperationStatus, Rejection, SessionPhase, SessionSnapshot};
use super::store::SessionStore;
use super::SessionError;
use crate::collector::{CollectTarget, CollectionError, CollectionOutcome, CollectionTask, Collector};
use crate::config::{AppConfig, CaptureSection};
use crate::download::{artifact_filename, ArtifactSink, DownloadReady};
use crate::orchestration::{ApiError, OrchestrationApi, ResourceKind};
use crate::workload::{capture_workload, cleanup_workload, namespace, CleanupWorkloadSpec};

/// 一次状态查询的结论
enum StatusView {
    Absent,
    Running(Vec<NodeCaptureStatus>),
}

/// 抓包会话控制器
pub struct SessionController {
    api: Arc<dyn OrchestrationApi>,
    collector: Arc<dyn Collector>,
    sink: Arc<dyn ArtifactSink>,
    store: Arc<dyn SessionStore>,
    layout: CaptureSection,
    policy: RetryPolicy,
    timings: Timings,
    /// start / stop / collect 进行中（含其延迟复查与清理阶段）
    op_in_flight: AtomicBool,
    checks_in_flight: AtomicUsize,
    seq: AtomicU64,
    active_collection: Mutex<Option<CancellationToken>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: &AppConfig,
        api: Arc<dyn OrchestrationApi>,
        collector: Arc<dyn Collector>,
        sink: Arc<dyn ArtifactSink>,
        store: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            collector,
            sink,
            store,
            layout: config.capture.clone(),
            policy: RetryPolicy::from_config(&config.timing),
            timings: Timings::from_config(&config.timing),
            op_in_flight: AtomicBool::new(false),
            checks_in_flight: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            active_collection: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SessionSnapshot> {
        self.store.subscribe()
    }

    /// 进程启动后的状态恢复：内存状态不持久化，只能重新查询集群
    /// 上次进程若在清理等待期间退出，清理 DaemonSet 会残留并持续删除节点上的抓包文件，这里一并移除
    pub async fn recover(self: &Arc<Self>) -> OperationStatus {
        tracing::info!("Recovering capture session state from the cluster");
        let status = self.check_status().await;
        if !self.op_in_flight.load(Ordering::SeqCst) {
            self.remove_stale_cleanup().await;
        }
        status
    }

    /// 退出前调用：取消进行中的收集，等待在途操作与后台清理结束
    pub async fn shutdown(&self) {
        self.cancel_collection().await;

        let mut rx = self.store.subscribe();
        let busy = rx.borrow().loading;
        if busy {
            tracing::info!("Waiting for in-flight operations before exit");
        }
        let _ = rx.wait_for(|s| !s.loading).await;

        let pending = self.cleanup_task.lock().await.take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                tracing::warn!("Cleanup task ended abnormally: {}", e);
            }
        }
    }

    /// 查询抓包 DaemonSet：404 表示没有会话在跑；其它失败按策略重试后上报
    pub async fn check_status(self: &Arc<Self>) -> OperationStatus {
        self.refresh(false).await
    }

    /// Idle → (提交抓包 DaemonSet) → 延迟复查 → Running
    pub async fn start(self: &Arc<Self>, filter: &str, image: &str) -> OperationStatus {
        if let Err(rejection) = self.begin(&[SessionPhase::Idle], None) {
            tracing::warn!("Start rejected: {}", rejection);
            return OperationStatus::Rejected(rejection);
        }
        self.store.update(&mut |s| {
            s.filter = filter.to_string();
            s.image = image.to_string();
            s.download = None;
            s.progress = None;
        });
        tracing::info!("Starting capture with filter '{}' and image {}", filter, image);

        match self.launch(filter, image).await {
            Ok(()) => {
                tracing::info!("Capture workload {} submitted", self.layout.daemonset_name);
                self.schedule_recheck();
                OperationStatus::Completed
            }
            Err(e) => {
                tracing::error!("Failed to start capture: {}", e);
                self.finish(SessionPhase::Idle, Some(e));
                OperationStatus::Failed
            }
        }
    }

    /// Running → StoppingOnly → (删除抓包 DaemonSet) → 延迟复查 → Idle
    pub async fn stop_only(self: &Arc<Self>) -> OperationStatus {
        if let Err(rejection) = self.begin(&[SessionPhase::Running], Some(SessionPhase::StoppingOnly)) {
            tracing::warn!("Stop rejected: {}", rejection);
            return OperationStatus::Rejected(rejection);
        }
        tracing::info!("Stopping capture workload {}", self.layout.daemonset_name);

        match self.delete_capture().await {
            Ok(()) => {
                self.schedule_recheck();
                OperationStatus::Completed
            }
            Err(e) => {
                tracing::error!("Failed to stop capture: {}", e);
                self.finish(SessionPhase::Error, Some(e));
                OperationStatus::Failed
            }
        }
    }

    /// Running → StoppingAndCollecting → 收集终态。
    /// 成功：交出下载地址、停止抓包、后台提交清理 → 等待 → 删除清理 → 最终复查。
    /// 失败：上报原因、回到 Running，抓包工作负载保持原样。
    pub async fn stop_and_collect(self: &Arc<Self>) -> OperationStatus {
        if let Err(rejection) = self.begin(
            &[SessionPhase::Running],
            Some(SessionPhase::StoppingAndCollecting),
        ) {
            tracing::warn!("Collect rejected: {}", rejection);
            return OperationStatus::Rejected(rejection);
        }
        self.store.update(&mut |s| {
            s.download = None;
            s.progress = None;
        });

        let targets: Vec<CollectTarget> = self
            .store
            .snapshot()
            .nodes
            .iter()
            .map(|n| CollectTarget {
                name: n.pod_name.clone(),
                node_name: n.node_name.clone(),
            })
            .collect();
        let task = CollectionTask::new(targets);
        tracing::info!(
            "Collecting capture files from {} pods (task {})",
            task.targets.len(),
            task.task_id
        );

        let stream = self.collector.collect(task).await;
        *self.active_collection.lock().await = Some(stream.cancel_token());
        let store = Arc::clone(&self.store);
        let outcome = stream
            .into_outcome(|message| {
                tracing::debug!("Collection progress: {}", message);
                store.update(&mut |s| s.progress = Some(message.to_string()));
            })
            .await;
        self.active_collection.lock().await.take();

        match outcome {
            CollectionOutcome::Complete { artifact_url } => {
                let download = DownloadReady {
                    url: artifact_url,
                    filename: artifact_filename(chrono::Local::now()),
                };
                self.store.update(&mut |s| {
                    s.download = Some(download.clone());
                    s.progress = Some("Collection complete".to_string());
                });
                self.sink.deliver(&download);

                let stop_error = self.delete_capture().await.err();
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move { this.cleanup(stop_error).await });
                *self.cleanup_task.lock().await = Some(handle);
                OperationStatus::Completed
            }
            CollectionOutcome::Failed(e) => {
                let err = match e {
                    CollectionError::Server(message) => SessionError::CollectionServer(message),
                    CollectionError::Cancelled => {
                        SessionError::CollectionConnectionFailed("cancelled".to_string())
                    }
                    other => SessionError::CollectionConnectionFailed(other.to_string()),
                };
                tracing::warn!("Collection failed, capture left running: {}", err);
                self.store.update(&mut |s| s.progress = None);
                self.finish(SessionPhase::Running, Some(err));
                OperationStatus::Failed
            }
        }
    }

    /// 关闭进行中的收集通道；后端已开始的工作不保证停止
    pub async fn cancel_collection(&self) -> bool {
        match self.active_collection.lock().await.as_ref() {
            Some(token) => {
                tracing::info!("Cancelling collection");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn loading(&self) -> bool {
        self.op_in_flight.load(Ordering::SeqCst) || self.checks_in_flight.load(Ordering::SeqCst) > 0
    }

    /// busy 守卫 + 阶段校验；通过后领取序号，使更早发起的状态检查结果失效
    fn begin(&self, allowed: &[SessionPhase], next: Option<SessionPhase>) -> Result<(), Rejection> {
        if self
            .op_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Rejection::Busy);
        }

        let phase = self.store.snapshot().phase;
        if !allowed.contains(&phase) {
            self.op_in_flight.store(false, Ordering::SeqCst);
            return Err(Rejection::InvalidPhase(phase));
        }

        let seq = self.next_seq();
        self.store.update(&mut |s| {
            s.revision = seq;
            s.last_error = None;
            s.loading = true;
            if let Some(next) = next {
                s.phase = next;
            }
        });
        Ok(())
    }

    /// 结束当前操作（不经过复查）
    fn finish(&self, phase: SessionPhase, error: Option<SessionError>) {
        self.op_in_flight.store(false, Ordering::SeqCst);
        self.store.update(&mut |s| {
            s.phase = phase;
            s.last_error = error.clone();
            s.loading = self.loading();
        });
    }

    fn schedule_recheck(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.timings.recheck_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.refresh(true).await;
        });
    }

    /// `resolves_op`：由 start / stop / collect 发起的复查，负责结束该操作
    async fn refresh(&self, resolves_op: bool) -> OperationStatus {
        let seq = self.next_seq();
        self.checks_in_flight.fetch_add(1, Ordering::SeqCst);
        self.store.update(&mut |s| s.loading = true);

        let result = self.query_status().await;

        self.checks_in_flight.fetch_sub(1, Ordering::SeqCst);
        if resolves_op {
            self.op_in_flight.store(false, Ordering::SeqCst);
        }
        let keep_phase = !resolves_op && self.op_in_flight.load(Ordering::SeqCst);

        let mut applied = false;
        self.store.update(&mut |s| {
            // 在快照锁内读取，避免覆盖其他线程刚置上的 loading
            s.loading = self.loading();
            if seq <= s.revision {
                return;
            }
            applied = true;
            s.revision = seq;
            let hold = keep_phase && s.phase.is_transitional();
            match &result {
                Ok(StatusView::Absent) => {
                    if !hold {
                        s.phase = SessionPhase::Idle;
                    }
                    s.nodes.clear();
                    s.last_error = None;
                }
                Ok(StatusView::Running(nodes)) => {
                    if !hold {
                        s.phase = SessionPhase::Running;
                    }
                    s.nodes = nodes.clone();
                    s.last_error = None;
                }
                Err(e) => {
                    if !hold {
                        s.phase = SessionPhase::Error;
                    }
                    s.last_error = Some(e.clone());
                }
            }
        });

        if !applied {
            tracing::debug!("Discarding stale status check #{}", seq);
        }
        match result {
            Ok(StatusView::Absent) => {
                tracing::info!("Capture workload not found, session idle");
                OperationStatus::Completed
            }
            Ok(StatusView::Running(nodes)) => {
                tracing::info!("Capture workload running on {} pods", nodes.len());
                OperationStatus::Completed
            }
            Err(e) => {
                tracing::error!("Failed to check capture status: {}", e);
                OperationStatus::Failed
            }
        }
    }

    async fn query_status(&self) -> Result<StatusView, SessionError> {
        let this = self;
        let result = self
            .policy
            .run("Capture status check", move || async move { this.fetch_status().await })
            .await;
        match result {
            Ok(view) => Ok(view),
            Err(e) if e.is_not_found() => Ok(StatusView::Absent),
            Err(e) => Err(SessionError::from_status_failure(e)),
        }
    }

    async fn fetch_status(&self) -> Result<StatusView, ApiError> {
        let ns = &self.layout.namespace;
        match self
            .api
            .get(ResourceKind::DaemonSet, ns, &self.layout.daemonset_name)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(StatusView::Absent),
            Err(e) => return Err(e),
        }

        let pods = self
            .api
            .list(ResourceKind::Pod, ns, &self.layout.label_selector())
            .await?;
        Ok(StatusView::Running(
            pods.iter().map(NodeCaptureStatus::from_pod).collect(),
        ))
    }

    /// 只在查询明确返回 404 时创建；其它查询错误原样返回，不尝试创建
    async fn ensure_namespace(&self) -> Result<(), SessionError> {
        let ns = &self.layout.namespace;
        match self.api.get(ResourceKind::Namespace, "", ns).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::info!("Namespace {} not found, creating it", ns);
                let body = serde_json::to_value(namespace(ns))
                    .map_err(|e| SessionError::Orchestration(ApiError::Decode(e.to_string())))?;
                self.api
                    .create(ResourceKind::Namespace, "", &body)
                    .await
                    .map(|_| ())
                    .map_err(|source| SessionError::NamespaceCreationFailed {
                        namespace: ns.clone(),
                        source,
                    })
            }
            Err(e) => Err(SessionError::Orchestration(e)),
        }
    }

    async fn launch(&self, filter: &str, image: &str) -> Result<(), SessionError> {
        self.ensure_namespace().await?;
        let spec = capture_workload(&self.layout, filter, image);
        let body = spec
            .to_json()
            .map_err(|e| SessionError::SessionStart(ApiError::Decode(e.to_string())))?;
        self.api
            .create(ResourceKind::DaemonSet, &self.layout.namespace, &body)
            .await
            .map(|_| ())
            .map_err(SessionError::SessionStart)
    }

    /// 删除抓包 DaemonSet；已不存在视为成功
    async fn delete_capture(&self) -> Result<(), SessionError> {
        match self
            .api
            .delete(
                ResourceKind::DaemonSet,
                &self.layout.namespace,
                &self.layout.daemonset_name,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::info!("Capture workload already absent");
                Ok(())
            }
            Err(e) => Err(SessionError::SessionStop(e)),
        }
    }

    /// 提交清理 DaemonSet；同名残留（409）先删除再重建
    async fn submit_cleanup(&self, spec: &CleanupWorkloadSpec) -> Result<(), ApiError> {
        let ns = &self.layout.namespace;
        let body = spec.to_json().map_err(|e| ApiError::Decode(e.to_string()))?;
        match self.api.create(ResourceKind::DaemonSet, ns, &body).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                tracing::warn!("Stale cleanup workload {} found, replacing it", spec.name());
                match self.api.delete(ResourceKind::DaemonSet, ns, spec.name()).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.api.create(ResourceKind::DaemonSet, ns, &body).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_stale_cleanup(&self) {
        let ns = &self.layout.namespace;
        let name = &self.layout.cleanup_daemonset_name;
        match self.api.get(ResourceKind::DaemonSet, ns, name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                tracing::warn!("Failed to look up cleanup workload {}: {}", name, e);
                return;
            }
        }
        match self.api.delete(ResourceKind::DaemonSet, ns, name).await {
            Ok(()) => tracing::warn!("Removed stale cleanup workload {}", name),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!("Failed to remove stale cleanup workload {}: {}", name, e),
        }
    }

    /// 收集成功后的后台清理：提交 → 等待 → 删除 → 最终复查。
    /// 清理失败只是降级，抓包包已经拿到。
    async fn cleanup(self: Arc<Self>, stop_error: Option<SessionError>) {
        let image = self.store.snapshot().image;
        let spec = cleanup_workload(&self.layout, &image, self.timings.cleanup_linger_secs);
        let ns = &self.layout.namespace;
        let mut degraded = stop_error;

        tracing::info!("Submitting cleanup workload {}", spec.name());
        match self.submit_cleanup(&spec).await {
            Ok(()) => {
                tokio::time::sleep(self.timings.cleanup_settle).await;
                match self.api.delete(ResourceKind::DaemonSet, ns, spec.name()).await {
                    Ok(()) => tracing::info!("Cleanup workload {} removed", spec.name()),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => degraded = Some(SessionError::CleanupFailed(e)),
                }
            }
            Err(e) => degraded = Some(SessionError::CleanupFailed(e)),
        }

        self.refresh(true).await;

        if let Some(err) = degraded {
            tracing::warn!("Collection succeeded but cleanup degraded: {}", err);
            self.store.update(&mut |s| s.last_error = Some(err.clone()));
        }
    }
}
