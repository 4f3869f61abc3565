//! Per-connection session loop
//!
//! Transport-agnostic: the axum WebSocket adapter maps its messages to
//! [`Frame`]s, tests drive it with in-memory channels.

use super::{MemberHandle, RealtimeHub};
use super::types::{
    ClientMessage, ConnectedPayload, ErrorPayload, PongPayload, ServerMessage, SnapshotPayload,
    SubscribedPayload,
};
use crate::credentials::ClientScope;
use crate::dashboard::{DashboardAggregator, DashboardSnapshot, DashboardStore};
use crate::error::{Error, Result};
use crate::models::ClassId;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Provides `refresh_data` snapshots
pub trait SnapshotSource: Send + Sync {
    fn load_snapshot(
        &self,
        scope: &ClientScope,
        class_id: Option<ClassId>,
    ) -> impl Future<Output = Result<DashboardSnapshot>> + Send;
}

impl<D: DashboardStore> SnapshotSource for DashboardAggregator<D> {
    async fn load_snapshot(&self, scope: &ClientScope, class_id: Option<ClassId>) -> Result<DashboardSnapshot> {
        self.snapshot(scope.school_id, class_id, self.today()).await
    }
}

impl<T: SnapshotSource> SnapshotSource for Arc<T> {
    fn load_snapshot(
        &self,
        scope: &ClientScope,
        class_id: Option<ClassId>,
    ) -> impl Future<Output = Result<DashboardSnapshot>> + Send {
        (**self).load_snapshot(scope, class_id)
    }
}

/// Time an evicted session's writer gets to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Session timing
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ping_interval: Duration,
}

/// Send an `error` message and close; used when the handshake is rejected
pub async fn reject<S>(mut sink: S, error: &Error)
where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    let message = ServerMessage::Error(ErrorPayload::from(error));
    match serde_json::to_string(&message) {
        Ok(json) => {
            if let Err(e) = sink.send(Frame::Text(json)).await {
                tracing::debug!(error = %e, "Failed to send handshake error");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize handshake error"),
    }
    let _ = sink.send(Frame::Close).await;
}

/// Run one authorized connection until either side goes away
pub async fn run_session<S, R, Src>(
    hub: Arc<RealtimeHub>,
    snapshots: Src,
    scope: ClientScope,
    mut sink: S,
    mut stream: R,
    config: SessionConfig,
) where
    S: Sink<Frame> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Frame> + Unpin + Send + 'static,
    Src: SnapshotSource + 'static,
{
    let (handle, mut rx) = hub.register(&scope).await;
    let Some(evicted) = hub.eviction_signal(&handle).await else {
        return;
    };

    hub.send_to(
        &handle,
        &ServerMessage::Connected(ConnectedPayload {
            connection_id: handle.id,
            school_id: scope.school_id,
            audience: scope.audience,
            class_id: scope.class_id,
        }),
    )
    .await;

    // Forward hub messages to the transport, ping on a timer
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + config.ping_interval,
            config.ping_interval,
        );
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if let Err(e) = sink.send(Frame::Text(text)).await {
                            tracing::debug!(connection_id = %handle.id, error = %e, "Send failed");
                            return;
                        }
                    }
                    // Unregistered or evicted
                    None => break,
                },
                _ = ticker.tick() => {
                    if sink.send(Frame::Ping(Vec::new())).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = sink.send(Frame::Close).await;
    });

    // Handle client frames
    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            recv_hub.mark_alive(&handle).await;
            match frame {
                Frame::Text(text) => handle_text(&recv_hub, &snapshots, &scope, &handle, &text).await,
                Frame::Ping(_) | Frame::Pong(_) => {}
                Frame::Close => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = evicted.notified() => {
            recv_task.abort();
            if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                tracing::warn!(connection_id = %handle.id, "Evicted client not draining, dropping transport");
                send_task.abort();
                let _ = (&mut send_task).await;
            }
        }
    }

    hub.unregister(&handle).await;
    tracing::info!(connection_id = %handle.id, "Session closed");
}

async fn handle_text<Src: SnapshotSource>(
    hub: &RealtimeHub,
    snapshots: &Src,
    scope: &ClientScope,
    handle: &MemberHandle,
    text: &str,
) {
    let reply = match ClientMessage::parse(text) {
        Ok(ClientMessage::Ping) => ServerMessage::Pong(PongPayload {
            server_time: Utc::now(),
        }),
        Ok(ClientMessage::Subscribe { class_id }) => {
            let effective = scope.effective_class(class_id);
            hub.set_class_filter(handle, effective).await;
            tracing::debug!(connection_id = %handle.id, class_id = ?effective, "Subscribed");
            ServerMessage::Subscribed(SubscribedPayload { class_id: effective })
        }
        Ok(ClientMessage::Refresh) => {
            let class_id = hub.class_filter(handle).await;
            match snapshots.load_snapshot(scope, class_id).await {
                Ok(snapshot) => ServerMessage::RefreshData(SnapshotPayload::for_audience(
                    snapshot,
                    scope.audience,
                )),
                Err(e) => {
                    tracing::error!(connection_id = %handle.id, error = %e, "Refresh failed");
                    ServerMessage::Error(ErrorPayload::from(&e))
                }
            }
        }
        Err(e) => {
            tracing::debug!(connection_id = %handle.id, error = %e, "Invalid client message");
            ServerMessage::Error(ErrorPayload::from(&e))
        }
    };

    if !hub.send_to(handle, &reply).await {
        tracing::debug!(connection_id = %handle.id, message_type = reply.message_type(), "Reply not queued");
    }
}
