//! 实时消息中枢
//!
//! 注册、注销与按用户直发都经由单一命令循环（[`HubRunner`]）串行处理，循环独占权威连接表，
//! 并把变更同步到读多写少的共享索引上。房间、私聊与全员扇出只在共享索引上持读锁查找，
//! 再以非阻塞方式写入各连接的出站队列；队列已满的连接会被关闭并注销，不影响其他接收者。

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use config::HubConfig;
use domain::{RoomId, ThreadId, UserId};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        RwLock,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::envelope::{EncodedEnvelope, OutboundEnvelope};
use crate::error::ApplicationError;
use crate::store::MessageStore;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 单次非阻塞投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// 出站队列已满，连接已被关闭
    Overflow,
    /// 连接已关闭，消息被丢弃
    Closed,
}

/// 注册表中保存的连接句柄。
///
/// 克隆共享同一个出站队列与关闭信号；`id` 区分同一用户的先后连接。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<EncodedEnvelope>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// 创建句柄及其出站队列的接收端
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<EncodedEnvelope>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            outbound,
            shutdown: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// 出站队列中尚未被写出的信封数
    pub fn queued(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }

    pub(crate) fn try_deliver(&self, payload: &EncodedEnvelope) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match self.outbound.try_send(payload.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.close();
                Delivery::Overflow
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Delivery::Closed
            }
        }
    }
}

/// 一次扇出的投递统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub command_queue_capacity: usize,
    pub announce_presence: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            command_queue_capacity: config.command_queue_capacity,
            announce_presence: config.announce_presence,
        }
    }
}

#[derive(Debug)]
enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionHandle),
    SendToUser {
        user_id: UserId,
        payload: EncodedEnvelope,
    },
    Shutdown,
}

type ConnectionIndex = Arc<RwLock<HashMap<UserId, ConnectionHandle>>>;

/// 中枢的共享入口，可廉价克隆。
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    connections: ConnectionIndex,
    store: Arc<dyn MessageStore>,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>, settings: HubSettings) -> (Self, HubRunner) {
        let (commands, receiver) = mpsc::channel(settings.command_queue_capacity.max(1));
        let connections: ConnectionIndex = Arc::new(RwLock::new(HashMap::new()));

        let hub = Self {
            commands,
            connections: connections.clone(),
            store,
        };
        let runner = HubRunner {
            commands: receiver,
            clients: HashMap::new(),
            index: connections,
            announce_presence: settings.announce_presence,
        };
        (hub, runner)
    }

    /// 创建中枢并在后台任务中运行命令循环
    pub fn spawn(store: Arc<dyn MessageStore>, settings: HubSettings) -> (Self, JoinHandle<()>) {
        let (hub, runner) = Self::new(store, settings);
        let task = tokio::spawn(runner.run());
        (hub, task)
    }

    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), ApplicationError> {
        self.commands
            .send(HubCommand::Register(handle))
            .await
            .map_err(|_| ApplicationError::HubClosed)
    }

    /// 注销连接；仅当注册表中仍是同一连接时才会移除。
    pub async fn unregister(&self, handle: ConnectionHandle) {
        if let Err(mpsc::error::SendError(HubCommand::Unregister(handle))) =
            self.commands.send(HubCommand::Unregister(handle)).await
        {
            handle.close();
            debug!(user_id = %handle.user_id(), "hub stopped before unregister");
        }
    }

    /// 按用户 id 直发。命令队列已满时丢弃并记录日志，用户不在线时静默忽略。
    pub fn send_to_user(
        &self,
        user_id: &UserId,
        envelope: &OutboundEnvelope,
    ) -> Result<(), ApplicationError> {
        let payload = envelope.encode()?;
        match self.commands.try_send(HubCommand::SendToUser {
            user_id: user_id.clone(),
            payload,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(user_id = %user_id, "hub command queue full, direct message dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ApplicationError::HubClosed),
        }
    }

    /// 向单个连接投递，队列溢出时关闭并注销该连接。
    pub fn deliver(
        &self,
        handle: &ConnectionHandle,
        envelope: &OutboundEnvelope,
    ) -> Result<Delivery, ApplicationError> {
        let payload = envelope.encode()?;
        let delivery = handle.try_deliver(&payload);
        if delivery == Delivery::Overflow {
            self.evict(handle);
        }
        Ok(delivery)
    }

    pub async fn send_to_room(
        &self,
        room_id: &RoomId,
        envelope: &OutboundEnvelope,
        exclude: Option<&UserId>,
    ) -> Result<FanOutReport, ApplicationError> {
        let members = self.store.list_room_members(room_id).await?;
        let payload = envelope.encode()?;
        let report = self.fan_out(&members, &payload, exclude).await;
        debug!(room_id = %room_id, ?report, "room fan-out");
        Ok(report)
    }

    pub async fn send_to_thread(
        &self,
        thread_id: &ThreadId,
        envelope: &OutboundEnvelope,
        exclude: Option<&UserId>,
    ) -> Result<FanOutReport, ApplicationError> {
        let participants = self.store.list_thread_participants(thread_id).await?;
        let payload = envelope.encode()?;
        let report = self.fan_out(&participants, &payload, exclude).await;
        debug!(thread_id = %thread_id, ?report, "thread fan-out");
        Ok(report)
    }

    pub async fn broadcast_all(
        &self,
        envelope: &OutboundEnvelope,
        exclude: Option<&UserId>,
    ) -> Result<FanOutReport, ApplicationError> {
        let payload = envelope.encode()?;
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(user_id, _)| Some(*user_id) != exclude)
                .map(|(_, handle)| handle.clone())
                .collect()
        };
        Ok(self.deliver_all(&targets, &payload))
    }

    pub async fn is_connected(&self, user_id: &UserId) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// 停止命令循环并关闭所有连接
    pub async fn shutdown(&self) {
        if self.commands.send(HubCommand::Shutdown).await.is_err() {
            debug!("hub already stopped");
        }
    }

    async fn fan_out(
        &self,
        recipients: &[UserId],
        payload: &EncodedEnvelope,
        exclude: Option<&UserId>,
    ) -> FanOutReport {
        // 读锁只用于查找，投递在释放锁之后进行
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            recipients
                .iter()
                .filter(|user_id| Some(*user_id) != exclude)
                .filter_map(|user_id| connections.get(user_id).cloned())
                .collect()
        };
        self.deliver_all(&targets, payload)
    }

    fn deliver_all(&self, targets: &[ConnectionHandle], payload: &EncodedEnvelope) -> FanOutReport {
        let (report, overflowed) = deliver_each(targets, payload);
        for handle in &overflowed {
            self.evict(handle);
        }
        report
    }

    fn evict(&self, handle: &ConnectionHandle) {
        warn!(
            user_id = %handle.user_id(),
            connection_id = handle.id(),
            "outbound queue full, closing slow connection"
        );
        handle.close();
        if self
            .commands
            .try_send(HubCommand::Unregister(handle.clone()))
            .is_err()
        {
            debug!(
                connection_id = handle.id(),
                "eviction left to connection teardown"
            );
        }
    }
}

/// 逐个非阻塞投递，返回统计与队列溢出（已被关闭）的连接
fn deliver_each(
    targets: &[ConnectionHandle],
    payload: &EncodedEnvelope,
) -> (FanOutReport, Vec<ConnectionHandle>) {
    let mut report = FanOutReport::default();
    let mut overflowed = Vec::new();
    for handle in targets {
        match handle.try_deliver(payload) {
            Delivery::Queued => report.delivered += 1,
            Delivery::Overflow => {
                report.evicted += 1;
                overflowed.push(handle.clone());
            }
            Delivery::Closed => report.skipped += 1,
        }
    }
    (report, overflowed)
}

/// 命令循环，独占权威连接表。
pub struct HubRunner {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<UserId, ConnectionHandle>,
    index: ConnectionIndex,
    announce_presence: bool,
}

impl HubRunner {
    pub async fn run(mut self) {
        info!("hub command loop started");
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register(handle) => self.register(handle).await,
                HubCommand::Unregister(handle) => self.unregister(&handle).await,
                HubCommand::SendToUser { user_id, payload } => {
                    self.send_to_user(&user_id, &payload).await
                }
                HubCommand::Shutdown => break,
            }
        }
        self.close_all().await;
        info!("hub command loop stopped");
    }

    async fn register(&mut self, handle: ConnectionHandle) {
        let user_id = handle.user_id().clone();
        if let Some(previous) = self.clients.insert(user_id.clone(), handle.clone()) {
            if previous.id() != handle.id() {
                // 旧连接不主动关闭，直到其自行断开
                info!(
                    user_id = %user_id,
                    previous_connection = previous.id(),
                    "connection replaced for user"
                );
            }
        }
        self.index
            .write()
            .await
            .insert(user_id.clone(), handle.clone());

        info!(
            user_id = %user_id,
            connection_id = handle.id(),
            clients = self.clients.len(),
            "client registered"
        );

        if self.announce_presence {
            let joined = OutboundEnvelope::UserJoined {
                sender_id: user_id.clone(),
            };
            let overflowed = self.broadcast_all(&joined, &user_id);
            self.unregister_all(overflowed).await;
        }
    }

    async fn unregister(&mut self, handle: &ConnectionHandle) {
        self.unregister_all(vec![handle.clone()]).await;
    }

    /// 逐个注销；下线广播中队列溢出的连接同样排入注销，并各自触发下线广播
    async fn unregister_all(&mut self, mut pending: Vec<ConnectionHandle>) {
        while let Some(handle) = pending.pop() {
            handle.close();
            if !self.detach(&handle).await {
                debug!(
                    user_id = %handle.user_id(),
                    connection_id = handle.id(),
                    "unregister ignored, connection not current"
                );
                continue;
            }

            info!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                clients = self.clients.len(),
                "client unregistered"
            );

            if self.announce_presence {
                let left = OutboundEnvelope::UserLeft {
                    sender_id: handle.user_id().clone(),
                };
                pending.extend(self.broadcast_all(&left, handle.user_id()));
            }
        }
    }

    /// 仅当表中仍是同一连接时移除，返回是否移除
    async fn detach(&mut self, handle: &ConnectionHandle) -> bool {
        let user_id = handle.user_id();
        match self.clients.get(user_id) {
            Some(current) if current.id() == handle.id() => {
                self.clients.remove(user_id);
            }
            _ => return false,
        }

        let mut index = self.index.write().await;
        if index.get(user_id).map(ConnectionHandle::id) == Some(handle.id()) {
            index.remove(user_id);
        }
        true
    }

    async fn send_to_user(&mut self, user_id: &UserId, payload: &EncodedEnvelope) {
        let Some(handle) = self.clients.get(user_id).cloned() else {
            debug!(user_id = %user_id, "direct message for offline user dropped");
            return;
        };

        match handle.try_deliver(payload) {
            Delivery::Queued => {}
            Delivery::Overflow => {
                warn!(user_id = %user_id, "outbound queue full, closing slow connection");
                self.unregister(&handle).await;
            }
            Delivery::Closed => debug!(user_id = %user_id, "direct message for closing connection dropped"),
        }
    }

    /// 向除 `exclude` 外的全部连接广播，返回需要注销的溢出连接
    fn broadcast_all(&self, envelope: &OutboundEnvelope, exclude: &UserId) -> Vec<ConnectionHandle> {
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode presence announcement");
                return Vec::new();
            }
        };

        let targets: Vec<ConnectionHandle> = self
            .clients
            .iter()
            .filter(|(user_id, _)| *user_id != exclude)
            .map(|(_, handle)| handle.clone())
            .collect();
        let (report, overflowed) = deliver_each(&targets, &payload);
        debug!(?report, "presence broadcast");
        for handle in &overflowed {
            warn!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                "outbound queue full, closing slow connection"
            );
        }
        overflowed
    }

    async fn close_all(&mut self) {
        for handle in self.clients.values() {
            handle.close();
        }
        self.clients.clear();
        self.index.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockMessageStore;
    use domain::RepositoryError;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn pong(id: &str) -> OutboundEnvelope {
        OutboundEnvelope::Pong {
            sender_id: user(id),
        }
    }

    fn spawn_hub(store: MockMessageStore, announce_presence: bool) -> Hub {
        let settings = HubSettings {
            command_queue_capacity: 64,
            announce_presence,
        };
        Hub::spawn(Arc::new(store), settings).0
    }

    async fn wait_connected(hub: &Hub, user_id: &UserId, expected: bool) {
        timeout(Duration::from_secs(2), async {
            while hub.is_connected(user_id).await != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry did not reach expected state");
    }

    async fn recv(receiver: &mut mpsc::Receiver<EncodedEnvelope>) -> OutboundEnvelope {
        let payload = timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("queue closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn send_to_user_reaches_registered_connection() {
        let hub = spawn_hub(MockMessageStore::new(), false);
        let (handle, mut rx) = ConnectionHandle::new(user("alice"), 8);
        hub.register(handle).await.unwrap();
        wait_connected(&hub, &user("alice"), true).await;

        hub.send_to_user(&user("alice"), &pong("bob")).unwrap();
        assert_eq!(recv(&mut rx).await, pong("bob"));
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_closes_connection() {
        let hub = spawn_hub(MockMessageStore::new(), false);
        let (handle, mut rx) = ConnectionHandle::new(user("alice"), 8);
        hub.register(handle.clone()).await.unwrap();
        wait_connected(&hub, &user("alice"), true).await;

        hub.unregister(handle.clone()).await;
        hub.unregister(handle.clone()).await;
        wait_connected(&hub, &user("alice"), false).await;
        assert!(handle.is_closed());
        assert_eq!(hub.connection_count().await, 0);

        // 注销后直发静默丢弃
        hub.send_to_user(&user("alice"), &pong("bob")).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_connection() {
        let hub = spawn_hub(MockMessageStore::new(), false);
        let (first, _first_rx) = ConnectionHandle::new(user("alice"), 8);
        let (second, mut second_rx) = ConnectionHandle::new(user("alice"), 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second.clone()).await.unwrap();
        hub.unregister(first.clone()).await;
        hub.send_to_user(&user("alice"), &pong("bob")).unwrap();

        assert_eq!(recv(&mut second_rx).await, pong("bob"));
        assert!(hub.is_connected(&user("alice")).await);
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn replaced_connection_is_left_open() {
        let hub = spawn_hub(MockMessageStore::new(), false);
        let (first, _first_rx) = ConnectionHandle::new(user("alice"), 8);
        let (second, _second_rx) = ConnectionHandle::new(user("alice"), 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second).await.unwrap();
        hub.send_to_user(&user("nobody"), &pong("x")).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(!first.is_closed());
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn slow_member_is_evicted_without_affecting_others() {
        let mut store = MockMessageStore::new();
        store
            .expect_list_room_members()
            .returning(|_| Ok(vec![user("r1"), user("r2"), user("sender")]));
        let hub = spawn_hub(store, false);

        let (fast, mut fast_rx) = ConnectionHandle::new(user("r1"), 4);
        let (slow, _slow_rx) = ConnectionHandle::new(user("r2"), 1);
        hub.register(fast.clone()).await.unwrap();
        hub.register(slow.clone()).await.unwrap();
        wait_connected(&hub, &user("r2"), true).await;

        // 填满慢连接的队列
        hub.deliver(&slow, &pong("x")).unwrap();

        let room = RoomId::parse("room").unwrap();
        let report = hub
            .send_to_room(&room, &pong("sender"), Some(&user("sender")))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(recv(&mut fast_rx).await, pong("sender"));
        assert!(slow.is_closed());
        assert!(!fast.is_closed());
        wait_connected(&hub, &user("r2"), false).await;
        assert!(hub.is_connected(&user("r1")).await);
    }

    #[tokio::test]
    async fn thread_fan_out_excludes_sender() {
        let mut store = MockMessageStore::new();
        store
            .expect_list_thread_participants()
            .returning(|_| Ok([user("alice"), user("bob")]));
        let hub = spawn_hub(store, false);

        let (alice, mut alice_rx) = ConnectionHandle::new(user("alice"), 4);
        let (bob, mut bob_rx) = ConnectionHandle::new(user("bob"), 4);
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();
        wait_connected(&hub, &user("bob"), true).await;

        let thread = ThreadId::parse("t1").unwrap();
        let report = hub
            .send_to_thread(&thread, &pong("alice"), Some(&user("alice")))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(recv(&mut bob_rx).await, pong("alice"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_thread_is_reported() {
        let mut store = MockMessageStore::new();
        store
            .expect_list_thread_participants()
            .returning(|_| Err(RepositoryError::NotFound));
        let hub = spawn_hub(store, false);

        let thread = ThreadId::parse("missing").unwrap();
        let result = hub.send_to_thread(&thread, &pong("alice"), None).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Repository(RepositoryError::NotFound))
        ));
    }

    #[tokio::test]
    async fn broadcast_all_reaches_every_other_connection() {
        let hub = spawn_hub(MockMessageStore::new(), false);
        let (alice, mut alice_rx) = ConnectionHandle::new(user("alice"), 4);
        let (bob, mut bob_rx) = ConnectionHandle::new(user("bob"), 4);
        let (carol, mut carol_rx) = ConnectionHandle::new(user("carol"), 4);
        for handle in [alice, bob, carol] {
            hub.register(handle).await.unwrap();
        }
        wait_connected(&hub, &user("carol"), true).await;

        let report = hub
            .broadcast_all(&pong("alice"), Some(&user("alice")))
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(recv(&mut bob_rx).await, pong("alice"));
        assert_eq!(recv(&mut carol_rx).await, pong("alice"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_is_announced_when_enabled() {
        let hub = spawn_hub(MockMessageStore::new(), true);
        let (alice, mut alice_rx) = ConnectionHandle::new(user("alice"), 4);
        let (bob, _bob_rx) = ConnectionHandle::new(user("bob"), 4);

        hub.register(alice).await.unwrap();
        hub.register(bob.clone()).await.unwrap();
        assert_eq!(
            recv(&mut alice_rx).await,
            OutboundEnvelope::UserJoined {
                sender_id: user("bob")
            }
        );

        hub.unregister(bob).await;
        assert_eq!(
            recv(&mut alice_rx).await,
            OutboundEnvelope::UserLeft {
                sender_id: user("bob")
            }
        );
    }

    #[tokio::test]
    async fn presence_overflow_evicts_and_announces_departure() {
        let hub = spawn_hub(MockMessageStore::new(), true);
        let (alice, mut alice_rx) = ConnectionHandle::new(user("alice"), 8);
        let (carol, mut carol_rx) = ConnectionHandle::new(user("carol"), 1);

        hub.register(alice).await.unwrap();
        hub.register(carol.clone()).await.unwrap();
        wait_connected(&hub, &user("carol"), true).await;
        assert_eq!(
            recv(&mut alice_rx).await,
            OutboundEnvelope::UserJoined {
                sender_id: user("carol")
            }
        );

        // carol 的队列被占满，bob 上线的广播使其溢出
        hub.deliver(&carol, &pong("alice")).unwrap();
        let (bob, mut bob_rx) = ConnectionHandle::new(user("bob"), 8);
        hub.register(bob).await.unwrap();

        wait_connected(&hub, &user("carol"), false).await;
        assert!(carol.is_closed());
        assert_eq!(recv(&mut carol_rx).await, pong("alice"));

        assert_eq!(
            recv(&mut alice_rx).await,
            OutboundEnvelope::UserJoined {
                sender_id: user("bob")
            }
        );
        assert_eq!(
            recv(&mut alice_rx).await,
            OutboundEnvelope::UserLeft {
                sender_id: user("carol")
            }
        );
        assert_eq!(
            recv(&mut bob_rx).await,
            OutboundEnvelope::UserLeft {
                sender_id: user("carol")
            }
        );
        assert!(hub.is_connected(&user("alice")).await);
        assert!(hub.is_connected(&user("bob")).await);
    }

    #[tokio::test]
    async fn shutdown_closes_connections_and_rejects_registration() {
        let (hub, runner) = Hub::new(Arc::new(MockMessageStore::new()), HubSettings::default());
        let task = tokio::spawn(runner.run());

        let (alice, _rx) = ConnectionHandle::new(user("alice"), 4);
        hub.register(alice.clone()).await.unwrap();
        hub.shutdown().await;
        task.await.unwrap();

        assert!(alice.is_closed());
        assert_eq!(hub.connection_count().await, 0);

        let (late, _late_rx) = ConnectionHandle::new(user("bob"), 4);
        assert!(matches!(
            hub.register(late).await,
            Err(ApplicationError::HubClosed)
        ));
    }
}
