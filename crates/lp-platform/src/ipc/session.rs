//! Presence session task.
//!
//! # Architecture
//!
//! One task owns the link to the presence service. The link is a tagged state
//! ([`Link`]) taken by value on every step, so a connection only exists inside
//! `Link::Connected` and is dropped on every teardown. The reconnect backoff is
//! plain data carried by the `Retry` and `Connecting` states.
//!
//! Callers never wait for the service: requests update the desired activity,
//! which is written once the service has answered the handshake with READY and
//! replayed after every reconnect.

use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lp_core::ports::{PresenceSessionPort, SessionError};
use lp_core::presence::{ActivityPayload, ConnectionStatus};
use lp_core::reconnect::{INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY};
use lp_core::ReconnectBackoff;
use thiserror::Error;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::connector::{BoxedIpcStream, IpcConnector};
use super::framing::{read_frame, write_frame, Frame, FrameError, Opcode, MAX_FRAME_BYTES};
use super::protocol::{
    handshake_payload, ping_payload, set_activity_payload, CloseReason, ServiceFrame,
};

const INBOUND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: String,
    /// Endpoints `0..endpoint_count` are probed in order on every attempt.
    pub endpoint_count: u8,
    /// Bound on opening one endpoint and completing its handshake.
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Drop the link when a ping stays unanswered this long. `None` never drops.
    pub pong_timeout: Option<Duration>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Whether the session starts connecting immediately.
    pub enabled: bool,
    pub command_queue_depth: usize,
    pub max_frame_bytes: usize,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: lp_core::config::app_config::DEFAULT_CLIENT_ID.to_string(),
            endpoint_count: lp_core::config::app_config::DEFAULT_ENDPOINT_COUNT,
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: None,
            initial_backoff: INITIAL_RECONNECT_DELAY,
            max_backoff: MAX_RECONNECT_DELAY,
            enabled: true,
            command_queue_depth: 32,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

/// Why a link attempt failed or a live link was torn down.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no presence service endpoint available")]
    Unavailable,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("rejected by presence service: {0}")]
    Rejected(String),

    #[error("presence service timed out")]
    Timeout,

    #[error("presence service closed the connection")]
    Closed,

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl LinkError {
    /// Failures reported to the user as an error status rather than a plain disconnect.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            LinkError::Frame(err) => err.is_protocol_violation(),
            LinkError::Protocol(_) | LinkError::Rejected(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
enum SessionCommand {
    SetActivity(ActivityPayload),
    ClearActivity,
    SetEnabled(bool),
}

/// Cloneable client of the session task.
#[derive(Clone)]
pub struct PresenceSessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl PresenceSessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl PresenceSessionPort for PresenceSessionHandle {
    async fn set_activity(&self, activity: ActivityPayload) -> Result<(), SessionError> {
        self.send(SessionCommand::SetActivity(activity)).await
    }

    async fn clear_activity(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ClearActivity).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::SetEnabled(enabled)).await
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// Start the session task. It runs until `cancel` fires or every handle is dropped.
pub fn spawn_presence_session(
    connector: Arc<dyn IpcConnector>,
    config: SessionConfig,
    cancel: CancellationToken,
) -> (PresenceSessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_queue_depth.max(1));
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let handle = PresenceSessionHandle {
        tx,
        status: status_rx,
    };
    let task = SessionTask {
        connector,
        enabled: config.enabled,
        config,
        status_tx,
        desired: None,
    };
    let join = tokio::spawn(
        task.run(rx, cancel)
            .instrument(info_span!("platform.presence_session")),
    );
    (handle, join)
}

/// What the service was last told.
#[derive(Debug, Clone, PartialEq)]
enum SentActivity {
    Set(ActivityPayload),
    Cleared,
}

struct SessionConnection {
    endpoint: u8,
    protocol_version: u32,
    writer: WriteHalf<BoxedIpcStream>,
    inbound: mpsc::Receiver<Result<Frame, FrameError>>,
    reader: JoinHandle<()>,
    last_sent: SentActivity,
    awaiting_pong_since: Option<Instant>,
    keepalive: Interval,
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

type ConnectAttempt = Pin<Box<dyn std::future::Future<Output = Result<SessionConnection, LinkError>> + Send>>;

enum Link {
    Disabled,
    Retry {
        backoff: ReconnectBackoff,
        retry_at: Instant,
    },
    Connecting {
        backoff: ReconnectBackoff,
        attempt: ConnectAttempt,
    },
    Connected(SessionConnection),
}

struct SessionTask {
    connector: Arc<dyn IpcConnector>,
    config: SessionConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    enabled: bool,
    /// Activity to show; `None` means nothing.
    desired: Option<ActivityPayload>,
}

impl SessionTask {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>, cancel: CancellationToken) {
        info!(
            endpoint_count = self.config.endpoint_count,
            enabled = self.enabled,
            "Presence session started"
        );
        let mut link = if self.enabled {
            self.begin_attempt(self.fresh_backoff())
        } else {
            Link::Disabled
        };

        loop {
            let step = match link {
                Link::Disabled => self.step_disabled(&mut rx, &cancel).await,
                Link::Retry { backoff, retry_at } => {
                    self.step_retry(backoff, retry_at, &mut rx, &cancel).await
                }
                Link::Connecting { backoff, attempt } => {
                    self.step_connecting(backoff, attempt, &mut rx, &cancel).await
                }
                Link::Connected(conn) => self.step_connected(conn, &mut rx, &cancel).await,
            };
            match step {
                ControlFlow::Continue(next) => link = next,
                ControlFlow::Break(()) => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        info!("Presence session stopped");
    }

    async fn step_disabled(
        &mut self,
        rx: &mut mpsc::Receiver<SessionCommand>,
        cancel: &CancellationToken,
    ) -> ControlFlow<(), Link> {
        tokio::select! {
            _ = cancel.cancelled() => ControlFlow::Break(()),
            command = rx.recv() => {
                let Some(command) = command else {
                    return ControlFlow::Break(());
                };
                if self.apply(command) && self.enabled {
                    ControlFlow::Continue(self.begin_attempt(self.fresh_backoff()))
                } else {
                    ControlFlow::Continue(Link::Disabled)
                }
            }
        }
    }

    async fn step_retry(
        &mut self,
        backoff: ReconnectBackoff,
        retry_at: Instant,
        rx: &mut mpsc::Receiver<SessionCommand>,
        cancel: &CancellationToken,
    ) -> ControlFlow<(), Link> {
        tokio::select! {
            _ = cancel.cancelled() => ControlFlow::Break(()),
            command = rx.recv() => {
                let Some(command) = command else {
                    return ControlFlow::Break(());
                };
                self.apply(command);
                if self.enabled {
                    ControlFlow::Continue(Link::Retry { backoff, retry_at })
                } else {
                    ControlFlow::Continue(self.disable_link())
                }
            }
            _ = sleep_until(retry_at) => ControlFlow::Continue(self.begin_attempt(backoff)),
        }
    }

    async fn step_connecting(
        &mut self,
        mut backoff: ReconnectBackoff,
        mut attempt: ConnectAttempt,
        rx: &mut mpsc::Receiver<SessionCommand>,
        cancel: &CancellationToken,
    ) -> ControlFlow<(), Link> {
        tokio::select! {
            _ = cancel.cancelled() => ControlFlow::Break(()),
            command = rx.recv() => {
                let Some(command) = command else {
                    return ControlFlow::Break(());
                };
                self.apply(command);
                if self.enabled {
                    ControlFlow::Continue(Link::Connecting { backoff, attempt })
                } else {
                    ControlFlow::Continue(self.disable_link())
                }
            }
            result = &mut attempt => match result {
                Ok(mut conn) => {
                    info!(
                        endpoint = conn.endpoint,
                        protocol_version = conn.protocol_version,
                        attempts = backoff.attempts(),
                        "Connected to presence service"
                    );
                    self.set_status(ConnectionStatus::Connected);
                    match self.sync_activity(&mut conn).await {
                        Ok(()) => ControlFlow::Continue(Link::Connected(conn)),
                        Err(err) => ControlFlow::Continue(self.after_teardown(conn, err)),
                    }
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    if err.is_protocol_violation() {
                        warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "Presence handshake failed");
                        self.set_status(ConnectionStatus::Error(err.to_string()));
                    } else {
                        debug!(error = %err, retry_in_ms = delay.as_millis() as u64, "Presence service not reachable");
                        self.set_status(ConnectionStatus::Disconnected);
                    }
                    ControlFlow::Continue(Link::Retry {
                        backoff,
                        retry_at: Instant::now() + delay,
                    })
                }
            },
        }
    }

    async fn step_connected(
        &mut self,
        mut conn: SessionConnection,
        rx: &mut mpsc::Receiver<SessionCommand>,
        cancel: &CancellationToken,
    ) -> ControlFlow<(), Link> {
        let pong_deadline = match (conn.awaiting_pong_since, self.config.pong_timeout) {
            (Some(since), Some(limit)) => Some(since + limit),
            _ => None,
        };

        let outcome: Result<(), LinkError> = tokio::select! {
            _ = cancel.cancelled() => {
                self.close_gracefully(conn).await;
                return ControlFlow::Break(());
            }
            command = rx.recv() => {
                let Some(command) = command else {
                    self.close_gracefully(conn).await;
                    return ControlFlow::Break(());
                };
                self.apply(command);
                self.sync_activity(&mut conn).await
            }
            inbound = conn.inbound.recv() => self.on_inbound(&mut conn, inbound).await,
            _ = conn.keepalive.tick() => self.send_ping(&mut conn).await,
            _ = sleep_until_opt(pong_deadline) => Err(LinkError::Timeout),
        };

        match outcome {
            Ok(()) => ControlFlow::Continue(Link::Connected(conn)),
            Err(err) => ControlFlow::Continue(self.after_teardown(conn, err)),
        }
    }

    /// Record a command. Returns true if the enabled flag changed.
    fn apply(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SetActivity(activity) => {
                self.desired = Some(activity);
                false
            }
            SessionCommand::ClearActivity => {
                self.desired = None;
                false
            }
            SessionCommand::SetEnabled(enabled) => {
                if enabled == self.enabled {
                    return false;
                }
                info!(enabled, "Presence session enabled flag changed");
                self.enabled = enabled;
                if !enabled {
                    self.desired = None;
                }
                true
            }
        }
    }

    fn begin_attempt(&self, backoff: ReconnectBackoff) -> Link {
        self.set_status(ConnectionStatus::Connecting);
        let attempt = connect(Arc::clone(&self.connector), self.config.clone());
        Link::Connecting { backoff, attempt }
    }

    fn disable_link(&self) -> Link {
        self.set_status(ConnectionStatus::Disconnected);
        Link::Disabled
    }

    fn fresh_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(self.config.initial_backoff, self.config.max_backoff)
    }

    fn after_teardown(&self, conn: SessionConnection, err: LinkError) -> Link {
        let endpoint = conn.endpoint;
        drop(conn);

        if !self.enabled {
            info!(endpoint, error = %err, "Presence link closed while disabled");
            return self.disable_link();
        }

        let mut backoff = self.fresh_backoff();
        let delay = backoff.next_delay();
        if err.is_protocol_violation() {
            warn!(endpoint, error = %err, "Presence link torn down after protocol violation");
            self.set_status(ConnectionStatus::Error(err.to_string()));
        } else {
            warn!(endpoint, error = %err, "Presence link lost");
            self.set_status(ConnectionStatus::Disconnected);
        }
        Link::Retry {
            backoff,
            retry_at: Instant::now() + delay,
        }
    }

    /// Bring the service in line with the desired activity, skipping repeats.
    async fn sync_activity(&self, conn: &mut SessionConnection) -> Result<(), LinkError> {
        let wanted = match &self.desired {
            Some(activity) => SentActivity::Set(activity.clone()),
            None => SentActivity::Cleared,
        };
        if conn.last_sent == wanted {
            return Ok(());
        }

        let payload = set_activity_payload(
            self.desired.as_ref(),
            std::process::id(),
            uuid::Uuid::new_v4().to_string(),
        )?;
        self.write(conn, Opcode::Frame, &payload).await?;
        debug!(
            endpoint = conn.endpoint,
            cleared = matches!(wanted, SentActivity::Cleared),
            "Activity sent"
        );
        conn.last_sent = wanted;
        Ok(())
    }

    async fn on_inbound(
        &self,
        conn: &mut SessionConnection,
        inbound: Option<Result<Frame, FrameError>>,
    ) -> Result<(), LinkError> {
        let frame = match inbound {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(LinkError::Closed),
        };

        match frame.opcode {
            Opcode::Ping => self.write(conn, Opcode::Pong, &frame.payload).await,
            Opcode::Pong => {
                conn.awaiting_pong_since = None;
                Ok(())
            }
            Opcode::Close => {
                let reason = CloseReason::parse(&frame.payload);
                info!(endpoint = conn.endpoint, reason = %reason, "Presence service closed the link");
                Err(LinkError::Closed)
            }
            Opcode::Handshake => Err(LinkError::Protocol("unexpected handshake frame".to_string())),
            Opcode::Frame => {
                let message = ServiceFrame::parse(&frame.payload)
                    .map_err(|e| LinkError::Protocol(format!("malformed frame: {e}")))?;
                if let Some(error) = message.error_message() {
                    warn!(
                        endpoint = conn.endpoint,
                        cmd = message.cmd.as_deref().unwrap_or_default(),
                        error = %error,
                        "Presence service reported an error"
                    );
                }
                Ok(())
            }
        }
    }

    async fn send_ping(&self, conn: &mut SessionConnection) -> Result<(), LinkError> {
        let payload = ping_payload(uuid::Uuid::new_v4().to_string())?;
        self.write(conn, Opcode::Ping, &payload).await?;
        if conn.awaiting_pong_since.is_none() {
            conn.awaiting_pong_since = Some(Instant::now());
        }
        Ok(())
    }

    async fn write(&self, conn: &mut SessionConnection, opcode: Opcode, payload: &[u8]) -> Result<(), LinkError> {
        match timeout(self.config.write_timeout, write_frame(&mut conn.writer, opcode, payload)).await {
            Ok(result) => result.map_err(LinkError::from),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    /// Clear the activity and send a close frame. Failures only get logged.
    async fn close_gracefully(&self, mut conn: SessionConnection) {
        if conn.last_sent != SentActivity::Cleared {
            let cleared = set_activity_payload(None, std::process::id(), uuid::Uuid::new_v4().to_string());
            if let Ok(payload) = cleared {
                if let Err(err) = self.write(&mut conn, Opcode::Frame, &payload).await {
                    debug!(error = %err, "Failed to clear activity on shutdown");
                }
            }
        }
        if let Err(err) = self.write(&mut conn, Opcode::Close, b"{}").await {
            debug!(error = %err, "Failed to send close frame");
        }
        info!(endpoint = conn.endpoint, "Presence link closed");
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            debug!(status = ?status, "Connection status changed");
        }
    }
}

/// Probe endpoints in order; the first one to complete the handshake wins.
fn connect(connector: Arc<dyn IpcConnector>, config: SessionConfig) -> ConnectAttempt {
    Box::pin(async move {
        let mut failure = LinkError::Unavailable;
        for index in 0..config.endpoint_count {
            match timeout(config.handshake_timeout, open_endpoint(connector.as_ref(), index, &config)).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(LinkError::Unavailable)) => {}
                Ok(Err(err)) => {
                    debug!(endpoint = index, error = %err, "Endpoint handshake failed");
                    failure = err;
                }
                Err(_) => {
                    debug!(endpoint = index, "Endpoint handshake timed out");
                    if !failure.is_protocol_violation() {
                        failure = LinkError::Timeout;
                    }
                }
            }
        }
        Err(failure)
    })
}

async fn open_endpoint(
    connector: &dyn IpcConnector,
    index: u8,
    config: &SessionConfig,
) -> Result<SessionConnection, LinkError> {
    let mut stream = connector
        .open(index)
        .await
        .map_err(|_| LinkError::Unavailable)?;
    let protocol_version = handshake(&mut stream, config).await?;

    let (reader, writer) = tokio::io::split(stream);
    let (inbound_tx, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let reader = tokio::spawn(read_loop(reader, inbound_tx, config.max_frame_bytes));

    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    Ok(SessionConnection {
        endpoint: index,
        protocol_version,
        writer,
        inbound,
        reader,
        last_sent: SentActivity::Cleared,
        awaiting_pong_since: None,
        keepalive,
    })
}

/// Send the handshake and wait for READY. Returns the negotiated protocol version.
async fn handshake(stream: &mut BoxedIpcStream, config: &SessionConfig) -> Result<u32, LinkError> {
    write_frame(stream, Opcode::Handshake, &handshake_payload(&config.client_id)?).await?;
    loop {
        let frame = read_frame(stream, config.max_frame_bytes)
            .await?
            .ok_or(LinkError::Closed)?;
        match frame.opcode {
            Opcode::Frame => {
                let message = ServiceFrame::parse(&frame.payload)
                    .map_err(|e| LinkError::Protocol(format!("malformed handshake reply: {e}")))?;
                if message.is_ready() {
                    return Ok(message.protocol_version());
                }
                if let Some(error) = message.error_message() {
                    return Err(LinkError::Rejected(error));
                }
                debug!(evt = ?message.evt, "Ignoring frame before READY");
            }
            Opcode::Close => {
                return Err(LinkError::Rejected(CloseReason::parse(&frame.payload).to_string()));
            }
            Opcode::Ping => write_frame(stream, Opcode::Pong, &frame.payload).await?,
            Opcode::Pong => {}
            Opcode::Handshake => {
                return Err(LinkError::Protocol("unexpected handshake frame".to_string()));
            }
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedIpcStream>,
    inbound: mpsc::Sender<Result<Frame, FrameError>>,
    max_frame_bytes: usize,
) {
    loop {
        match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(frame)) => {
                if inbound.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = inbound.send(Err(err)).await;
                return;
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
