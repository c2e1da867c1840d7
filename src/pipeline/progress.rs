//! Per-request progress channel.
//!
//! One producer ([`ProgressReporter`], owned by the pipeline task) and one
//! consumer ([`ForecastStream`], handed to the caller). Percentages are clamped
//! to be non-decreasing. The terminal event is sent by
//! [`ProgressReporter::finish`], which consumes the reporter, so nothing can be
//! sent after it and the channel closes behind it.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::ForecastError;
use crate::types::{ErrorReport, ForecastOutcome, PipelineEvent, ProgressEvent, Stage};

/// The consumer went away; the pipeline should abandon its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Producer half of a forecast's event stream.
#[derive(Debug)]
pub struct ProgressReporter {
    /// `None` discards events (direct, non-streaming runs)
    tx: Option<mpsc::Sender<PipelineEvent>>,
    last_percent: u8,
}

impl ProgressReporter {
    /// Bounded reporter/stream pair.
    pub fn channel(capacity: usize) -> (Self, ForecastStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                last_percent: 0,
            },
            ForecastStream { rx },
        )
    }

    /// Reporter that drops every event and never disconnects.
    pub const fn silent() -> Self {
        Self {
            tx: None,
            last_percent: 0,
        }
    }

    pub const fn last_percent(&self) -> u8 {
        self.last_percent
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(mpsc::Sender::is_closed)
    }

    /// Resolves once the consumer has dropped its stream.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    /// Emit a progress event. Waits for channel capacity.
    pub async fn progress(
        &mut self,
        percent: u8,
        stage: Stage,
        message: impl Into<String>,
    ) -> Result<(), Disconnected> {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let event = PipelineEvent::Progress(ProgressEvent {
            percent,
            message: message.into(),
            stage,
        });
        tx.send(event).await.map_err(|_| Disconnected)
    }

    /// A second handle that can report a failure if the task owning this
    /// reporter dies before calling [`finish`](Self::finish).
    pub(crate) fn abort_guard(&self) -> AbortGuard {
        AbortGuard {
            tx: self.tx.clone(),
        }
    }

    /// Emit the terminal event and close the stream.
    pub async fn finish(
        self,
        result: Result<ForecastOutcome, ForecastError>,
    ) -> Result<(), Disconnected> {
        let Some(tx) = self.tx else {
            return Ok(());
        };
        let event = match result {
            Ok(result) => PipelineEvent::Completed { result },
            Err(e) => PipelineEvent::Failed {
                error: e.to_report(),
            },
        };
        tx.send(event).await.map_err(|_| Disconnected)
    }
}

/// Terminal-event fallback held by whoever supervises the pipeline task.
///
/// Only used when the task died without finishing; a normal run has already
/// sent its terminal event and the guard is dropped unused.
#[derive(Debug)]
pub(crate) struct AbortGuard {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl AbortGuard {
    pub(crate) async fn fail(self, error: &ForecastError) {
        if let Some(tx) = self.tx {
            let _ = tx
                .send(PipelineEvent::Failed {
                    error: error.to_report(),
                })
                .await;
        }
    }
}

/// Consumer half: zero or more progress events, then exactly one terminal
/// event, then `None`.
#[derive(Debug)]
pub struct ForecastStream {
    rx: mpsc::Receiver<PipelineEvent>,
}

impl ForecastStream {
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    /// Drain the stream, returning every event in order.
    pub async fn collect_events(mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Drain the stream and return only the terminal outcome.
    pub async fn into_result(mut self) -> Result<ForecastOutcome, ErrorReport> {
        while let Some(event) = self.rx.recv().await {
            match event {
                PipelineEvent::Progress(_) => {}
                PipelineEvent::Completed { result } => return Ok(result),
                PipelineEvent::Failed { error } => return Err(error),
            }
        }
        Err(ForecastError::Internal {
            message: "forecast task ended without a terminal event".to_string(),
        }
        .to_report())
    }
}

impl Stream for ForecastStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
