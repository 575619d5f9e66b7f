#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{MessageStore, SessionValidator};
use config::AppConfig;
use domain::{RoomId, ThreadId, UserId};
use futures_util::StreamExt;
use infrastructure::InMemoryMessageStore;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryMessageStore>,
    pub state: AppState,
    pub jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AppConfig::default()).await
    }

    pub async fn start_with(config: AppConfig) -> Self {
        let jwt = JwtService::new(config.jwt.clone());
        Self::start_with_validator(config, Arc::new(jwt)).await
    }

    /// 使用自定义会话校验器启动；`token()` 仍按配置中的 JWT 参数签发
    pub async fn start_with_validator(
        config: AppConfig,
        session_validator: Arc<dyn SessionValidator>,
    ) -> Self {
        let store = Arc::new(InMemoryMessageStore::new());
        let jwt = JwtService::new(config.jwt.clone());
        let (state, _hub_task) = AppState::build(
            &config,
            store.clone() as Arc<dyn MessageStore>,
            session_validator,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            state,
            jwt,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/api/v1/ws?token={}", self.addr, token),
            None => format!("ws://{}/api/v1/ws", self.addr),
        }
    }

    pub fn token(&self, user: &str) -> String {
        self.jwt
            .generate_token(&user_id(user), None)
            .expect("token")
    }

    pub async fn join_room(&self, room: &str, users: &[&str]) {
        for user in users {
            self.store.add_room_member(room_id(room), user_id(user)).await;
        }
    }

    pub async fn open_thread(&self, thread: &str, first: &str, second: &str) {
        self.store
            .create_thread(thread_id(thread), user_id(first), user_id(second))
            .await
            .expect("thread");
    }

    /// 建立连接并等待中枢完成注册
    pub async fn connect(&self, user: &str) -> WsClient {
        let (ws, _) = connect_async(self.ws_url(Some(&self.token(user))))
            .await
            .expect("ws connect");
        timeout(Duration::from_secs(2), async {
            while !self.state.hub.is_connected(&user_id(user)).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection registered");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub fn user_id(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

pub fn room_id(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

pub fn thread_id(id: &str) -> ThreadId {
    ThreadId::parse(id).unwrap()
}

/// 读取下一条文本帧并解析为 JSON，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await.expect("ws closed").expect("ws error") {
                TungsteniteMessage::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("json envelope")
                }
                TungsteniteMessage::Close(_) => panic!("connection closed"),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

/// 断言在给定时间内没有收到文本帧
pub async fn assert_silent(ws: &mut WsClient, wait: Duration) {
    let result = timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                _ => futures_util::future::pending::<()>().await,
            }
        }
    })
    .await;
    if let Ok(text) = result {
        panic!("unexpected envelope: {text}");
    }
}
