//! 工作负载清单构建：抓包 DaemonSet、清理 DaemonSet、Namespace
//!
//! 全部是纯函数，无状态、无 I/O；输出可直接序列化后提交给编排 API。

pub mod capture;
pub mod cleanup;
pub mod manifest;

pub use capture::{artifact_path, capture_workload, CaptureWorkloadSpec};
pub use cleanup::{cleanup_workload, CleanupWorkloadSpec};
pub use manifest::{namespace, DaemonSet, Namespace};
