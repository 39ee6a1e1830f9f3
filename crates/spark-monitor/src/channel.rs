//! Reconnect-capable comm channel to the kernel-side Spark listener.
//!
//! The channel manager owns the one live "SparkMonitor" channel for a
//! notebook session. It opens the channel once execution tracking is live,
//! announces the fresh frontend to the listener, hands inbound frames to
//! the dispatcher, and reopens from scratch whenever the kernel reports a
//! fresh start. A backend without comm support is a degraded mode, not an
//! error: the manager logs a warning and waits for the next restart signal
//! rather than retrying on a timer.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cell_tracker::CellTracker;
use crate::dispatch::Dispatcher;
use crate::protocol::{CommMessage, CHANNEL_NAME};

/// Kernel lifecycle status, as reported by the host session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    /// Kernel is starting (or restarting) up
    Starting,
    /// Kernel is ready and idle
    Idle,
    /// Kernel is executing code
    Busy,
    /// Kernel is shutting down
    ShuttingDown,
}

impl std::fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelStatus::Starting => write!(f, "starting"),
            KernelStatus::Idle => write!(f, "idle"),
            KernelStatus::Busy => write!(f, "busy"),
            KernelStatus::ShuttingDown => write!(f, "shutdown"),
        }
    }
}

/// Lifecycle of the managed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No channel, none being opened.
    Closed,
    /// An open request is in flight.
    Opening,
    /// The channel is live.
    Open,
    /// The kernel closed its end; informational, not an error.
    ClosedByRemote,
}

/// Errors opening a comm channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The kernel session does not expose the comm channel API.
    #[error("kernel does not support comm channels")]
    Unsupported,

    /// The kernel accepted the request but failed to open the channel.
    #[error("failed to open comm channel")]
    OpenFailed(#[from] anyhow::Error),
}

/// One end of an open comm channel.
///
/// `tx` carries frontend→kernel frames; `rx` delivers the kernel's frames
/// and is consumed by the manager's read loop once the channel is
/// installed.
pub struct CommChannel {
    /// Client-generated id for this channel instance.
    pub comm_id: String,
    pub tx: mpsc::UnboundedSender<CommMessage>,
    pub rx: mpsc::UnboundedReceiver<CommMessage>,
}

/// A request to open a named comm channel, answered over `reply`.
///
/// Dropping `reply` without answering means the host cannot open comm
/// channels at all.
pub struct OpenChannelRequest {
    pub channel_name: String,
    pub comm_id: String,
    pub reply: oneshot::Sender<Result<CommChannel, ChannelError>>,
}

/// Capability object for talking to the host kernel session.
///
/// Exposes exactly what the channel manager needs: opening a named comm
/// channel and observing kernel status transitions. The manager never sees
/// the wider host environment.
#[derive(Clone)]
pub struct KernelConnector {
    opens: mpsc::UnboundedSender<OpenChannelRequest>,
    status: watch::Receiver<KernelStatus>,
}

impl KernelConnector {
    pub fn new(
        opens: mpsc::UnboundedSender<OpenChannelRequest>,
        status: watch::Receiver<KernelStatus>,
    ) -> Self {
        Self { opens, status }
    }

    /// Request a named channel from the kernel. Suspends until the host
    /// answers the handshake.
    pub async fn open_channel(&self, name: &str) -> Result<CommChannel, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = OpenChannelRequest {
            channel_name: name.to_string(),
            comm_id: Uuid::new_v4().to_string(),
            reply: reply_tx,
        };
        self.opens
            .send(request)
            .map_err(|_| ChannelError::Unsupported)?;
        reply_rx.await.map_err(|_| ChannelError::Unsupported)?
    }

    /// Subscribe to kernel status transitions.
    pub fn status(&self) -> watch::Receiver<KernelStatus> {
        self.status.clone()
    }
}

struct ManagerState {
    state: ChannelState,
    /// Outbound sender of the live channel, if any. Holding it keeps the
    /// frontend→kernel direction alive.
    channel_tx: Option<mpsc::UnboundedSender<CommMessage>>,
    /// Read-loop task for the live channel; replaced (and aborted) on
    /// reopen.
    reader: Option<JoinHandle<()>>,
    /// Incremented per install so a replaced read loop cannot clobber the
    /// state of its successor.
    epoch: u64,
}

/// Owns the single live comm channel for a notebook session.
pub struct ChannelManager {
    connector: KernelConnector,
    tracker: Arc<CellTracker>,
    dispatcher: Arc<Dispatcher>,
    inner: Arc<Mutex<ManagerState>>,
}

impl ChannelManager {
    pub fn new(
        connector: KernelConnector,
        tracker: Arc<CellTracker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            connector,
            tracker,
            dispatcher,
            inner: Arc::new(Mutex::new(ManagerState {
                state: ChannelState::Closed,
                channel_tx: None,
                reader: None,
                epoch: 0,
            })),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().unwrap().state
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().channel_tx.is_some()
    }

    /// Open (or replace) the comm channel.
    ///
    /// Waits for the cell tracker's readiness gate first: a channel opened
    /// before execution tracking is live would deliver events with no
    /// correlation target. On success the announce frame is sent and the
    /// dispatcher becomes the channel's message handler. On failure the
    /// channel is left unset; the next kernel restart retries naturally.
    pub async fn open(&self) -> Result<(), ChannelError> {
        self.tracker.ready().await;
        self.inner.lock().unwrap().state = ChannelState::Opening;

        match self.connector.open_channel(CHANNEL_NAME).await {
            Ok(channel) => {
                self.install(channel);
                Ok(())
            }
            Err(err) => {
                let mut state = self.inner.lock().unwrap();
                state.state = ChannelState::Closed;
                state.channel_tx = None;
                Err(err)
            }
        }
    }

    /// Install a freshly opened channel, discarding any previous one
    /// without draining it.
    fn install(&self, channel: CommChannel) {
        let CommChannel {
            comm_id,
            tx,
            mut rx,
        } = channel;

        if tx.send(CommMessage::open_from_frontend()).is_err() {
            warn!("[channel] comm {} closed before announce", comm_id);
        }

        let dispatcher = self.dispatcher.clone();
        let inner = self.inner.clone();
        let mut state = self.inner.lock().unwrap();
        state.epoch += 1;
        let epoch = state.epoch;
        state.state = ChannelState::Open;
        state.channel_tx = Some(tx);

        let reader = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatcher.handle_message(&message);
            }
            // Remote close: legitimate on kernel shutdown, never an error.
            let mut state = inner.lock().unwrap();
            if state.epoch == epoch {
                state.state = ChannelState::ClosedByRemote;
                state.channel_tx = None;
            }
            debug!("[channel] comm closed by kernel");
        });
        if let Some(old) = state.reader.replace(reader) {
            old.abort();
        }
        drop(state);

        info!("[channel] comm channel open (comm_id={})", comm_id);
    }

    /// Drop the live channel, if any, without draining it.
    pub fn close(&self) {
        let mut state = self.inner.lock().unwrap();
        state.state = ChannelState::Closed;
        state.channel_tx = None;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
    }

    /// Drive the channel lifecycle: open once at startup, then clear the
    /// re-execution flag and reopen on every kernel restart signal.
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.open().await {
            warn!("[channel] open failed: {}", err);
        }
        let mut status = self.connector.status();
        loop {
            if status.changed().await.is_err() {
                debug!("[channel] status subscription closed");
                break;
            }
            let current = *status.borrow_and_update();
            debug!("[channel] kernel status: {}", current);
            if current == KernelStatus::Starting {
                info!("[channel] kernel restarting, reopening comm channel");
                self.tracker.clear_reexecuted();
                if let Err(err) = self.open().await {
                    warn!("[channel] reopen failed: {}", err);
                }
            }
        }
    }
}
