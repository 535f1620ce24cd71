//! 收集协议客户端：消息定义、WebSocket 客户端、可取消事件流、脚本化后端

pub mod client;
pub mod message;
pub mod mock;
pub mod stream;

pub use client::{Collector, WsCollector};
pub use message::{CollectTarget, CollectionTask, ServerMessage};
pub use mock::ScriptedCollector;
pub use stream::{CollectionError, CollectionEvent, CollectionOutcome, CollectionStream};
