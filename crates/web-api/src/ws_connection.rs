//! WebSocket 连接
//!
//! 每个连接由读、写两个泵组成：
//! - 读泵在当前任务中运行，按到达顺序把文本帧交给路由器，读超时只由 pong 刷新
//! - 写泵在独立任务中运行，合并写出出站队列中已有的信封，并定时发送 ping
//!
//! 任一泵出错、读超时、帧过大或被中枢因队列溢出关闭，都会取消共享的关闭信号，两个泵随之退出，
//! 最后向中枢发出且只发出一次注销。

use std::{fmt::Display, pin::Pin, sync::Arc, time::Duration};

use application::{ConnectionHandle, EncodedEnvelope, Hub, MessageRouter};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use config::HubConfig;
use domain::UserId;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// 与具体 WebSocket 实现无关的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl From<WsMessage> for Frame {
    fn from(message: WsMessage) -> Self {
        match message {
            WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
            WsMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
            WsMessage::Ping(bytes) => Frame::Ping(bytes.to_vec()),
            WsMessage::Pong(bytes) => Frame::Pong(bytes.to_vec()),
            WsMessage::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for WsMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
            Frame::Ping(bytes) => WsMessage::Ping(bytes.into()),
            Frame::Pong(bytes) => WsMessage::Pong(bytes.into()),
            Frame::Close => WsMessage::Close(None),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("no pong received within {0:?}")]
    ReadTimeout(Duration),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

impl ConnectionError {
    pub fn transport(err: impl Display) -> Self {
        Self::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub send_queue_capacity: usize,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

impl From<&HubConfig> for ConnectionSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity,
            write_wait: config.write_wait(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            max_message_size: config.max_message_size,
        }
    }
}

/// 把 axum 的 WebSocket 拆成帧流与帧接收端
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Frame, ConnectionError>> + Send + 'static,
    impl Sink<Frame, Error = ConnectionError> + Send + 'static,
) {
    let (sink, stream) = socket.split();
    let writer = sink
        .sink_map_err(ConnectionError::transport)
        .with(|frame: Frame| future::ready(Ok::<_, ConnectionError>(WsMessage::from(frame))));
    let reader = stream.map(|message| {
        message
            .map(Frame::from)
            .map_err(ConnectionError::transport)
    });
    (reader, writer)
}

pub struct WebSocketConnection<R, W> {
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<EncodedEnvelope>,
    reader: R,
    writer: W,
    hub: Hub,
    router: Arc<MessageRouter>,
    settings: ConnectionSettings,
}

impl<R, W> WebSocketConnection<R, W>
where
    R: Stream<Item = Result<Frame, ConnectionError>> + Send + 'static,
    W: Sink<Frame, Error = ConnectionError> + Send + 'static,
{
    pub fn new(
        user_id: UserId,
        reader: R,
        writer: W,
        hub: Hub,
        router: Arc<MessageRouter>,
        settings: ConnectionSettings,
    ) -> Self {
        let (handle, outbound) = ConnectionHandle::new(user_id, settings.send_queue_capacity);
        Self {
            handle,
            outbound,
            reader,
            writer,
            hub,
            router,
            settings,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// 注册到中枢并运行至连接结束
    pub async fn run(self) {
        let Self {
            handle,
            outbound,
            reader,
            writer,
            hub,
            router,
            settings,
        } = self;

        if let Err(err) = hub.register(handle.clone()).await {
            tracing::warn!(
                user_id = %handle.user_id(),
                error = %err,
                "hub unavailable, dropping connection"
            );
            return;
        }
        tracing::info!(
            user_id = %handle.user_id(),
            connection_id = handle.id(),
            "WebSocket connection established"
        );

        let shutdown = handle.shutdown_token();

        let writer_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let result = write_pump(writer, outbound, shutdown.clone(), settings).await;
                shutdown.cancel();
                result
            }
        });

        let read_result = read_pump(reader, &handle, &router, shutdown.clone(), settings).await;
        shutdown.cancel();

        let write_result = match writer_task.await {
            Ok(result) => result,
            Err(err) => Err(ConnectionError::transport(err)),
        };

        hub.unregister(handle.clone()).await;

        match (read_result, write_result) {
            (Ok(()), Ok(())) => tracing::info!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                "WebSocket connection closed"
            ),
            (read, write) => tracing::info!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                read_error = ?read.err(),
                write_error = ?write.err(),
                "WebSocket connection torn down"
            ),
        }
    }
}

async fn read_pump<R>(
    reader: R,
    handle: &ConnectionHandle,
    router: &MessageRouter,
    shutdown: CancellationToken,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError>
where
    R: Stream<Item = Result<Frame, ConnectionError>> + Send,
{
    let mut reader = Box::pin(reader);
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = time::timeout_at(deadline, reader.next()) => next,
        };

        let frame = match next {
            Err(_) => return Err(ConnectionError::ReadTimeout(settings.pong_wait)),
            Ok(None) => return Ok(()),
            Ok(Some(frame)) => frame?,
        };

        match frame {
            Frame::Text(text) => {
                check_size(text.len(), settings.max_message_size)?;
                router.handle_frame(handle, &text).await;
            }
            Frame::Binary(bytes) => {
                check_size(bytes.len(), settings.max_message_size)?;
                router
                    .handle_frame(handle, &String::from_utf8_lossy(&bytes))
                    .await;
            }
            Frame::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
            }
            // 对端 ping 由底层 WebSocket 自动回复
            Frame::Ping(_) => {}
            Frame::Close => return Ok(()),
        }
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), ConnectionError> {
    if size > limit {
        return Err(ConnectionError::FrameTooLarge { size, limit });
    }
    Ok(())
}

async fn write_pump<W>(
    writer: W,
    mut outbound: mpsc::Receiver<EncodedEnvelope>,
    shutdown: CancellationToken,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError>
where
    W: Sink<Frame, Error = ConnectionError> + Send,
{
    let mut writer = Box::pin(writer);
    let mut ticker = time::interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        let step = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            payload = outbound.recv() => match payload {
                Some(payload) => write_batch(&mut writer, payload, &mut outbound, settings.write_wait).await,
                None => break Ok(()),
            },
            _ = ticker.tick() => send_frame(&mut writer, Frame::Ping(Vec::new()), settings.write_wait).await,
        };
        if let Err(err) = step {
            break Err(err);
        }
    };

    // 正常退出时尽力通知对端关闭，写失败后不再尝试
    if result.is_ok()
        && time::timeout(settings.write_wait, writer.send(Frame::Close))
            .await
            .is_err()
    {
        tracing::debug!("close frame not written before deadline");
    }
    result
}

/// 写出一条信封以及队列中已就绪的后续信封，统一 flush 一次
async fn write_batch<W>(
    writer: &mut Pin<Box<W>>,
    first: EncodedEnvelope,
    outbound: &mut mpsc::Receiver<EncodedEnvelope>,
    write_wait: Duration,
) -> Result<(), ConnectionError>
where
    W: Sink<Frame, Error = ConnectionError>,
{
    time::timeout(write_wait, async {
        writer.feed(Frame::Text(first.to_string())).await?;
        while let Ok(next) = outbound.try_recv() {
            writer.feed(Frame::Text(next.to_string())).await?;
        }
        writer.flush().await
    })
    .await
    .map_err(|_| ConnectionError::WriteTimeout(write_wait))?
}

async fn send_frame<W>(
    writer: &mut Pin<Box<W>>,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), ConnectionError>
where
    W: Sink<Frame, Error = ConnectionError>,
{
    time::timeout(write_wait, writer.send(frame))
        .await
        .map_err(|_| ConnectionError::WriteTimeout(write_wait))?
}
