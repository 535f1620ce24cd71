//! 抓包会话：状态机、错误、重试策略与状态存储

pub mod controller;
pub mod error;
pub mod policy;
pub mod state;
pub mod store;

pub use controller::SessionController;
pub use error::SessionError;
pub use policy::{RetryPolicy, Timings};
pub use state::{NodeCaptureStatus, OperationStatus, Rejection, SessionPhase, SessionSnapshot};
pub use store::{MemorySessionStore, SessionStore};
