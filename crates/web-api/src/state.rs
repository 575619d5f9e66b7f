use std::sync::Arc;

use application::{
    Hub, HubSettings, MessageHistoryService, MessageRouter, MessageStore, SessionValidator,
};
use config::AppConfig;
use tokio::task::JoinHandle;

use crate::ws_connection::ConnectionSettings;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub router: Arc<MessageRouter>,
    pub history: Arc<MessageHistoryService>,
    pub session_validator: Arc<dyn SessionValidator>,
    pub connection_settings: ConnectionSettings,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// 启动中枢命令循环并装配各服务，返回状态与命令循环任务
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn MessageStore>,
        session_validator: Arc<dyn SessionValidator>,
    ) -> (Self, JoinHandle<()>) {
        let (hub, hub_task) = Hub::spawn(store.clone(), HubSettings::from(&config.hub));
        let router = Arc::new(MessageRouter::new(hub.clone(), store.clone()));
        let history = Arc::new(MessageHistoryService::new(store));

        let state = Self {
            hub,
            router,
            history,
            session_validator,
            connection_settings: ConnectionSettings::from(&config.hub),
            allowed_origins: Arc::new(config.server.allowed_origins.clone()),
        };
        (state, hub_task)
    }

    /// 未配置允许列表时接受任意 Origin
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            Some(origin) => self.allowed_origins.iter().any(|allowed| allowed == origin),
            // 非浏览器客户端不带 Origin
            None => true,
        }
    }
}
