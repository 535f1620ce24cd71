//! 编排网关：编排 API 抽象与实现（HTTP / 内存）

pub mod error;
pub mod http;
pub mod memory;
pub mod traits;

pub use error::ApiError;
pub use http::KubeHttpClient;
pub use memory::{ApiCall, ApiOp, MemoryOrchestrator};
pub use traits::{OrchestrationApi, ResourceKind};
