//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 接入、历史消息查询与健康检查，连接读写泵位于 `ws_connection`。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, Claims, JwtService};
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{
    split_socket, ConnectionError, ConnectionSettings, Frame, WebSocketConnection,
};
