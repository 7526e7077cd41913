//! Channel carrying a backend's progress and result units to the worker.

use std::pin::Pin;
use std::task::{Context, Poll};

use forge_core::GeneratedImage;
use futures_util::Stream;
use tokio::sync::mpsc;

use super::BackendError;

/// One unit yielded by a running generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationUpdate {
    Progress {
        step: u32,
        total_steps: u32,
        percentage: f64,
        preview_image: Option<String>,
    },
    /// Terminal unit; nothing follows it.
    Result { images: Vec<GeneratedImage> },
}

type Item = Result<GenerationUpdate, BackendError>;

/// Create a connected sink/stream pair.
///
/// The channel holds a single unit, so a producer can never run more than one
/// step ahead of the worker.
pub fn generation_channel() -> (GenerationSink, GenerationStream) {
    let (tx, rx) = mpsc::channel(1);
    (GenerationSink { tx }, GenerationStream { rx })
}

/// Producer half, owned by the backend.
///
/// Every send fails with [`BackendError::StreamClosed`] once the worker has
/// dropped the stream; producers should stop at that point.
pub struct GenerationSink {
    tx: mpsc::Sender<Item>,
}

impl GenerationSink {
    pub async fn progress(
        &self,
        step: u32,
        total_steps: u32,
        preview_image: Option<String>,
    ) -> Result<(), BackendError> {
        let update = GenerationUpdate::Progress {
            step,
            total_steps,
            percentage: percentage(step, total_steps),
            preview_image,
        };
        self.send(Ok(update)).await
    }

    /// Send the terminal result, consuming the sink.
    pub async fn finish(self, images: Vec<GeneratedImage>) -> Result<(), BackendError> {
        self.send(Ok(GenerationUpdate::Result { images })).await
    }

    /// Report a failure, consuming the sink.
    pub async fn fail(self, error: BackendError) -> Result<(), BackendError> {
        self.send(Err(error)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, item: Item) -> Result<(), BackendError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| BackendError::StreamClosed)
    }
}

/// Consumer half, read by the worker. Finite and not restartable.
pub struct GenerationStream {
    rx: mpsc::Receiver<Item>,
}

impl Stream for GenerationStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Completion percentage rounded to one decimal.
pub fn percentage(step: u32, total_steps: u32) -> f64 {
    if total_steps == 0 {
        return 100.0;
    }
    (f64::from(step) / f64::from(total_steps) * 1000.0).round() / 10.0
}
