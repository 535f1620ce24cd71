//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KUBECAP__*` 覆盖（双下划线表示嵌套，如 `KUBECAP__COLLECTOR__PORT=9000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterSection,
    pub capture: CaptureSection,
    pub collector: CollectorSection,
    pub timing: TimingSection,
    pub download: DownloadSection,
}

/// [cluster] 段：编排 API 地址与认证
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// API Server 地址，默认指向 `kubectl proxy`
    pub api_server: String,
    pub token: Option<String>,
    /// 集群内运行时可指向 ServiceAccount token 文件
    pub token_file: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            api_server: "http://127.0.0.1:8001".to_string(),
            token: None,
            token_file: None,
            accept_invalid_certs: false,
            request_timeout_secs: 30,
        }
    }
}

/// [capture] 段：抓包 / 清理 DaemonSet 的命名与镜像
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub namespace: String,
    pub daemonset_name: String,
    pub app_label: String,
    pub cleanup_daemonset_name: String,
    pub cleanup_app_label: String,
    pub image: String,
    /// 节点本地目录（hostPath）
    pub host_dir: String,
    /// 容器内挂载点
    pub mount_path: String,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            namespace: "kubexm-capture".to_string(),
            daemonset_name: "tcpdump-capture-ds".to_string(),
            app_label: "tcpdump-capture".to_string(),
            cleanup_daemonset_name: "tcpdump-cleanup-ds".to_string(),
            cleanup_app_label: "tcpdump-cleanup".to_string(),
            image: "registry.dev.rdev.tech:18093/headlamp/super-netshoot:2.0".to_string(),
            host_dir: "/tmp/captures".to_string(),
            mount_path: "/captures".to_string(),
        }
    }
}

impl CaptureSection {
    /// 抓包 Pod 的 label selector，如 `app=tcpdump-capture`
    pub fn label_selector(&self) -> String {
        format!("app={}", self.app_label)
    }
}

/// [collector] 段：收集后端地址。端口固定、不做服务发现。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            path: "/".to_string(),
        }
    }
}

/// [timing] 段：重试与延迟（毫秒 / 秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub status_attempts: u32,
    pub status_retry_delay_ms: u64,
    pub recheck_delay_ms: u64,
    pub cleanup_settle_ms: u64,
    /// 清理 Pod 删除文件后自行退出前的等待（秒）
    pub cleanup_linger_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            status_attempts: 3,
            status_retry_delay_ms: 2000,
            recheck_delay_ms: 2000,
            cleanup_settle_ms: 5000,
            cleanup_linger_secs: 3,
        }
    }
}

impl TimingSection {
    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_delay_ms)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }

    pub fn cleanup_settle(&self) -> Duration {
        Duration::from_millis(self.cleanup_settle_ms)
    }
}

/// [download] 段：抓包包下载目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub dir: PathBuf,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

/// 从 config 目录加载配置，环境变量 KUBECAP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KUBECAP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KUBECAP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.capture.namespace, "kubexm-capture");
        assert_eq!(cfg.capture.daemonset_name, "tcpdump-capture-ds");
        assert_eq!(cfg.capture.label_selector(), "app=tcpdump-capture");
        assert_eq!(cfg.timing.status_attempts, 3);
        assert_eq!(cfg.timing.status_retry_delay(), Duration::from_secs(2));
        assert_eq!(cfg.timing.cleanup_settle(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[collector]\nhost = \"10.0.0.5\"\nport = 9001\n\n[timing]\nstatus_attempts = 5"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.collector.host, "10.0.0.5");
        assert_eq!(cfg.collector.port, 9001);
        assert_eq!(cfg.collector.path, "/");
        assert_eq!(cfg.timing.status_attempts, 5);
        assert_eq!(cfg.timing.recheck_delay_ms, 2000);
        assert_eq!(cfg.capture.host_dir, "/tmp/captures");
    }
}
