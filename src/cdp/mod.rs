//! # Chrome DevTools Protocol (CDP) 层
//!
//! 提供与页面目标的 WebSocket 通信接口。定位器层只依赖 [`CdpConnection`] trait，
//! 因此可以用 [`MockCdpConnection`] 在没有浏览器的情况下测试。
//!
//! ## 模块结构
//! - `traits`: CDP 连接的核心 trait 定义
//! - `types`: CDP 协议相关的数据类型
//! - `connection`: WebSocket 连接实现
//! - `mock`: 用于测试的 Mock 实现

pub mod traits;
pub mod types;
pub mod connection;
pub mod mock;

pub use traits::{CdpConnection, CdpEvent};
pub use types::{AxNode, EvaluateResponse, RemoteObject};

pub use connection::CdpWebSocketConnection;

pub use mock::MockCdpConnection;
