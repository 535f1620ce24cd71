//! kubecap - 集群级抓包会话控制器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 初始化
//! - **workload**: 抓包 / 清理 DaemonSet 与 Namespace 清单构建
//! - **orchestration**: 编排 API 抽象（Kubernetes REST / 内存实现）
//! - **collector**: 收集协议（WebSocket 客户端、可取消事件流）
//! - **session**: 会话状态机、重试策略、状态快照
//! - **download**: 抓包包下载

pub mod collector;
pub mod config;
pub mod download;
pub mod observability;
pub mod orchestration;
pub mod session;
pub mod workload;

pub use config::{load_config, AppConfig};
pub use session::{SessionController, SessionPhase, SessionSnapshot};
