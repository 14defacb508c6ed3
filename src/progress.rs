//! Progress events and the throttle between the engine and its observer.
//!
//! The engine reports every completed file. [`ProgressReporter`] forwards an
//! event only when the percentage moved by at least one point since the last
//! forwarded event, or when the batch is complete.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn percentage(&self) -> f64 {
        percentage(self.completed, self.total)
    }

    pub fn is_final(&self) -> bool {
        self.completed == self.total
    }
}

/// Receiver of forwarded progress events.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send {
    fn on_progress(&mut self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// Calls a closure for every forwarded event.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: FnMut(&ProgressEvent) + Send,
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

/// Queues events for another task or thread to drain and render.
impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn on_progress(&mut self, event: &ProgressEvent) {
        // a dropped receiver only means nobody is watching any more
        let _ = self.send(event.clone());
    }
}

pub struct ProgressReporter<S> {
    sink: S,
    last_forwarded: f64,
    forwarded: usize,
}

impl<S: ProgressSink> ProgressReporter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_forwarded: 0.0,
            forwarded: 0,
        }
    }

    /// Report one update. Returns whether it reached the sink.
    pub fn report(&mut self, completed: usize, total: usize, message: impl Into<String>) -> bool {
        let current = percentage(completed, total);
        if (current - self.last_forwarded).abs() < 1.0 && completed != total {
            return false;
        }

        let event = ProgressEvent {
            completed,
            total,
            message: message.into(),
        };
        self.sink.on_progress(&event);
        self.last_forwarded = current;
        self.forwarded += 1;
        true
    }

    /// Number of events that reached the sink.
    pub fn forwarded_count(&self) -> usize {
        self.forwarded
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}
