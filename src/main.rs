//! kubecap - 集群级抓包会话控制器
//!
//! 入口：初始化日志、加载配置、恢复会话状态，然后从标准输入读取指令。
//! 状态变化由渲染任务订阅快照后打印；Ctrl+C 先取消进行中的收集，再次按下退出。
//! 退出前等待在途操作与后台清理结束。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use kubecap::collector::WsCollector;
use kubecap::config::load_config;
use kubecap::download::HttpDownloader;
use kubecap::observability;
use kubecap::orchestration::KubeHttpClient;
use kubecap::session::{
    MemorySessionStore, OperationStatus, SessionController, SessionPhase, SessionSnapshot,
};

const HELP: &str = "\
commands:
  status              re-query the cluster
  start [filter...]   start capturing on every node (filter passed to tcpdump verbatim)
  image <ref>         set the image used by the next start
  stop                stop capturing, keep files on the nodes
  collect             stop and collect files from every node
  cancel              cancel an in-flight collection
  help                show this message
  quit                exit";

/// 支持 `--config <path>` 与 `--config=<path>`
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn render(s: &SessionSnapshot, host_dir: &str) {
    let loading = if s.loading { " (loading)" } else { "" };
    println!("[{}]{}", s.phase, loading);
    if !s.filter.is_empty() {
        println!("  filter: {}", s.filter);
    }
    println!("  image:  {}", s.image);
    if !s.nodes.is_empty() {
        println!("  {:<44} {:<24} {}", "POD", "NODE", "PHASE");
        for n in &s.nodes {
            println!("  {:<44} {:<24} {}", n.pod_name, n.node_name, n.runtime_phase);
        }
    }
    if s.phase == SessionPhase::Running {
        println!("  capture files: {}/<node>.pcap on each node", host_dir);
    }
    if let Some(progress) = &s.progress {
        println!("  progress: {}", progress);
    }
    if let Some(download) = &s.download {
        println!("  download: {} -> {}", download.url, download.filename);
    }
    if let Some(err) = &s.last_error {
        println!("  error: {}", err);
    }
}

fn report(op: &str, status: OperationStatus) {
    match status {
        OperationStatus::Completed => tracing::info!("{} completed", op),
        OperationStatus::Failed => tracing::warn!("{} failed", op),
        OperationStatus::Rejected(reason) => tracing::warn!("{} rejected: {}", op, reason),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(config_path_from_args()).context("Failed to load config")?;
    let api = KubeHttpClient::from_config(&cfg.cluster).context("Failed to create API client")?;
    tracing::info!("Using orchestration API at {}", api.base_url());

    let collector = WsCollector::new(cfg.collector.clone());
    tracing::info!("Collector endpoint {}", collector.endpoint());

    let store = Arc::new(MemorySessionStore::new(SessionSnapshot::new(&cfg.capture.image)));
    let controller = SessionController::new(
        &cfg,
        Arc::new(api),
        Arc::new(collector),
        Arc::new(HttpDownloader::new(&cfg.download.dir)),
        store,
    );

    let mut rx = controller.subscribe();
    let host_dir = cfg.capture.host_dir.clone();
    tokio::spawn(async move {
        let mut last: Option<SessionSnapshot> = None;
        while rx.changed().await.is_ok() {
            let mut current = rx.borrow_and_update().clone();
            current.revision = 0;
            if last.as_ref() != Some(&current) {
                render(&current, &host_dir);
                last = Some(current);
            }
        }
    });

    report("recover", controller.recover().await);
    println!("{}", HELP);

    let mut image = cfg.capture.image.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if controller.cancel_collection().await {
                    continue;
                }
                break;
            }
        };

        let line = line.trim();
        let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let c = Arc::clone(&controller);
        match cmd {
            "" => {}
            "status" => {
                tokio::spawn(async move { report("status", c.check_status().await) });
            }
            "start" => {
                let filter = rest.to_string();
                let image = image.clone();
                tokio::spawn(async move { report("start", c.start(&filter, &image).await) });
            }
            "image" if !rest.is_empty() => {
                image = rest.to_string();
                tracing::info!("Next capture will use image {}", image);
            }
            "stop" => {
                tokio::spawn(async move { report("stop", c.stop_only().await) });
            }
            "collect" => {
                tokio::spawn(async move { report("collect", c.stop_and_collect().await) });
            }
            "cancel" => {
                if !c.cancel_collection().await {
                    tracing::info!("No collection in progress");
                }
            }
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            other => println!("unknown command '{}', type 'help'", other),
        }
    }

    // 等待后台清理跑完，避免清理 DaemonSet 残留；再按一次 Ctrl+C 强制退出
    tokio::select! {
        _ = controller.shutdown() => {}
        _ = tokio::signal::ctrl_c() => tracing::warn!("Forced exit, cleanup workload may be left behind"),
    }
    tracing::info!("Exiting; capture workloads left in the cluster keep running");
    Ok(())
}
