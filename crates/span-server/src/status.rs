//! Coordinator status reporting.
//!
//! The coordinator announces state transitions through a [`StatusReporter`]
//! so the binary can log them, a future UI can display them, and tests can
//! record them. Reporting is async because a real reporter may write to a
//! socket or a UI channel.

use async_trait::async_trait;
use tracing::info;

use span_core::protocol::version::ProtocolVersion;

use crate::proxy::DisconnectCause;

/// A coordinator state transition worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The listener is up.
    Listening { addr: String },
    /// A client completed the handshake and was admitted.
    ScreenConnected {
        name: String,
        version: ProtocolVersion,
    },
    /// The client reported its shape and may now receive the cursor.
    ScreenReady { name: String },
    /// A client went away.
    ScreenDisconnected {
        name: String,
        cause: DisconnectCause,
    },
    /// The cursor jumped between screens.
    ActiveScreenChanged { from: String, to: String },
    /// The server's screensaver state was forwarded to clients.
    ScreensaverChanged { active: bool },
}

/// Sink for [`StatusEvent`]s.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, event: StatusEvent);
}

/// Reporter that writes each event to the `tracing` log.
#[derive(Debug, Default)]
pub struct TracingReporter;

#[async_trait]
impl StatusReporter for TracingReporter {
    async fn report(&self, event: StatusEvent) {
        match event {
            StatusEvent::Listening { addr } => info!(%addr, "listening"),
            StatusEvent::ScreenConnected { name, version } => {
                info!(screen = %name, %version, "screen connected");
            }
            StatusEvent::ScreenReady { name } => info!(screen = %name, "screen ready"),
            StatusEvent::ScreenDisconnected { name, cause } => {
                info!(screen = %name, cause = cause.describe(), "screen disconnected");
            }
            StatusEvent::ActiveScreenChanged { from, to } => {
                info!(%from, %to, "active screen changed");
            }
            StatusEvent::ScreensaverChanged { active } => {
                info!(active, "screensaver state forwarded");
            }
        }
    }
}

/// Reporter that collects events for assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: std::sync::Mutex<Vec<StatusEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().expect("reporter lock poisoned").clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, event: StatusEvent) {
        self.events.lock().expect("reporter lock poisoned").push(event);
    }
}
