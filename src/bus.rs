//! Output event bus — decouples the interpreter core from its display sinks.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Output produced by the interpreter session or the local executor.
/// Consumed exactly once by the router; no history is retained in the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Plain text for the transcript, control sequences already stripped.
    Text { payload: String },
    /// Rendered markup (HTML/JS) for the render surface.
    Markup { payload: String },
    /// The session was reset; the transcript display should clear.
    Cleared,
}

// ---------------------------------------------------------------------------
// OutputRouter
// ---------------------------------------------------------------------------

/// Capacity of each sink channel.
const BUS_CAPACITY: usize = 256;

/// Receiver half handed to the embedder. Build-log and status lines travel on
/// their own channels so they never interleave with transcript events.
#[derive(Debug)]
pub struct OutputSinks {
    pub transcript_rx: mpsc::Receiver<String>,
    pub markup_rx: mpsc::Receiver<String>,
    pub clear_rx: mpsc::Receiver<()>,
    pub build_rx: mpsc::Receiver<String>,
    pub status_rx: mpsc::Receiver<String>,
}

/// Pure dispatch by event kind. Sends are fire-and-forget: a dropped
/// receiver discards the event instead of failing the producer.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    transcript_tx: mpsc::Sender<String>,
    markup_tx: mpsc::Sender<String>,
    clear_tx: mpsc::Sender<()>,
    build_tx: mpsc::Sender<String>,
    status_tx: mpsc::Sender<String>,
    attach_output: bool,
}

impl OutputRouter {
    /// Create the router and its sink bundle. `attach_output` gates
    /// forwarding of `Text` events to the transcript sink.
    pub fn channel(attach_output: bool) -> (Self, OutputSinks) {
        let (transcript_tx, transcript_rx) = mpsc::channel(BUS_CAPACITY);
        let (markup_tx, markup_rx) = mpsc::channel(BUS_CAPACITY);
        let (clear_tx, clear_rx) = mpsc::channel(BUS_CAPACITY);
        let (build_tx, build_rx) = mpsc::channel(BUS_CAPACITY);
        let (status_tx, status_rx) = mpsc::channel(BUS_CAPACITY);
        (
            Self {
                transcript_tx,
                markup_tx,
                clear_tx,
                build_tx,
                status_tx,
                attach_output,
            },
            OutputSinks {
                transcript_rx,
                markup_rx,
                clear_rx,
                build_rx,
                status_rx,
            },
        )
    }

    /// Forward one event to its sink. At most one sink is invoked per event;
    /// per-channel arrival order is preserved.
    pub async fn route(&self, event: OutputEvent) {
        match event {
            OutputEvent::Text { payload } => {
                if self.attach_output {
                    let _ = self.transcript_tx.send(payload).await;
                }
            }
            OutputEvent::Markup { payload } => {
                let _ = self.markup_tx.send(payload).await;
            }
            OutputEvent::Cleared => {
                let _ = self.clear_tx.send(()).await;
            }
        }
    }

    /// One line of sandbox image build output.
    pub async fn build_log(&self, line: String) {
        let _ = self.build_tx.send(line).await;
    }

    /// Status line for the embedder ("preparing…", error notices).
    pub async fn status(&self, message: String) {
        let _ = self.status_tx.send(message).await;
    }
}
