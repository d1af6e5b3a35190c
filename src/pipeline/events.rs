//! Events bound for the main (UI-owning) context.
//!
//! Preview and export never call back into the caller directly. They post
//! [`EngineEvent`]s to an [`EventSender`]; the main context drains them from
//! its [`MainQueue`] and is the only place that touches UI-facing state.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::pipeline::export::ExportReport;
use crate::video::time::MediaTime;
use crate::video::types::Image;

/// Where an event may be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Only on the main context, after redelivery through the [`MainQueue`]
    MainContext,
    /// Anywhere; informational only
    Any,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A filtered frame ready to display
    FrameRendered {
        image: Arc<Image>,
        presentation_time: MediaTime,
    },
    /// Normalized playback position in [0, 1]
    PositionUpdated(f64),
    PlaybackChanged { paused: bool },
    /// The frame source reopened its asset after a stall
    SourceReopened { reopen_count: usize },
    /// Export progress in [0, 1], non-decreasing within one export
    ExportProgress(f64),
    ExportCompleted(ExportReport),
    ExportFailed { reason: String, cancelled: bool },
    /// The hand-off collaborator reported back; the local artifact is gone
    HandOffCompleted {
        artifact: PathBuf,
        persisted: Result<PathBuf, String>,
    },
}

impl EngineEvent {
    pub fn delivery(&self) -> Delivery {
        match self {
            EngineEvent::SourceReopened { .. } => Delivery::Any,
            _ => Delivery::MainContext,
        }
    }
}

/// Cloneable producer side, usable from any thread
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<EngineEvent>,
}

impl EventSender {
    /// Post an event. Events posted after the queue is dropped are discarded.
    pub fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("Main queue closed, dropping event");
        }
    }
}

/// Receiving side, owned by the main context
#[derive(Debug)]
pub struct MainQueue {
    rx: UnboundedReceiver<EngineEvent>,
}

impl MainQueue {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every event queued so far
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

pub fn main_queue() -> (EventSender, MainQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, MainQueue { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut queue) = main_queue();
        tx.send(EngineEvent::ExportProgress(0.25));
        tx.send(EngineEvent::ExportProgress(0.5));

        let fractions: Vec<f64> = queue
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ExportProgress(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.25, 0.5]);
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_send_from_other_thread() {
        let (tx, mut queue) = main_queue();
        std::thread::spawn(move || tx.send(EngineEvent::PositionUpdated(1.0)))
            .join()
            .unwrap();
        assert!(matches!(queue.try_recv(), Some(EngineEvent::PositionUpdated(p)) if p == 1.0));
    }

    #[test]
    fn test_ui_events_need_main_context() {
        assert_eq!(EngineEvent::PositionUpdated(0.1).delivery(), Delivery::MainContext);
        assert_eq!(
            EngineEvent::SourceReopened { reopen_count: 1 }.delivery(),
            Delivery::Any
        );
    }

    #[test]
    fn test_closed_queue_discards() {
        let (tx, queue) = main_queue();
        drop(queue);
        tx.send(EngineEvent::PlaybackChanged { paused: true });
    }
}
