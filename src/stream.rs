//! Background conversions with a live progress stream.
//!
//! [`Converter::start`](crate::Converter::start) spawns the conversion on
//! the Tokio runtime and hands back a [`ProgressStream`] of events and a
//! [`ConversionTask`] resolving to the outcome.
//!
//! The stream is lazy and finite: it yields events in emission order, holds
//! no history for late subscribers, and ends once the conversion has
//! released its reporter.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_stream::StreamExt;
//!
//! use mp3drop::{ConversionError, Converter, LocalFolderRelay, VideoInput};
//!
//! # async fn example() -> Result<(), ConversionError> {
//! let converter = Converter::builder(Arc::new(LocalFolderRelay::new("uploads"))).build();
//! let input = VideoInput::from_path("clip.mp4")?;
//! let (mut progress, task) = converter.start(input, "Clip");
//!
//! while let Some(event) = progress.next().await {
//!     println!("[{:>3}%] {}", event.percent, event.message);
//! }
//! let outcome = task.await?;
//! println!("{}", outcome.receipt.link);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use futures_core::Stream;

use crate::converter::ConversionOutcome;
use crate::error::ConversionError;
use crate::progress::{ProgressEvent, ProgressSink, Stage};

/// The stage most recently reported by a running conversion.
pub(crate) type StageCell = Arc<Mutex<Stage>>;

/// Events of one conversion, in emission order.
///
/// Implements [`Stream`](futures_core::Stream). Dropping the stream does
/// not stop the conversion; events are then discarded.
pub struct ProgressStream {
    receiver: UnboundedReceiver<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A future resolving to the result of a background conversion.
pub struct ConversionTask {
    handle: JoinHandle<Result<ConversionOutcome, ConversionError>>,
    stage: StageCell,
}

impl Future for ConversionTask {
    type Output = Result<ConversionOutcome, ConversionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let stage = Arc::clone(&self.stage);
        Pin::new(&mut self.handle).poll(cx).map(|result| {
            result.unwrap_or_else(|error| {
                let stage = match stage.lock() {
                    Ok(guard) => *guard,
                    Err(poisoned) => *poisoned.into_inner(),
                };
                Err(ConversionError::Aborted {
                    stage,
                    reason: error.to_string(),
                })
            })
        })
    }
}

/// Forwards events to the stream and to the converter's own sink.
pub(crate) struct ChannelSink {
    sender: UnboundedSender<ProgressEvent>,
    inner: Arc<dyn ProgressSink>,
    stage: StageCell,
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Ok(mut stage) = self.stage.lock() {
            *stage = event.stage;
        }
        self.inner.on_progress(event);
        // The stream may already be gone.
        let _ = self.sender.send(event.clone());
    }
}

/// Build the sink, stream and stage cell for one background conversion.
pub(crate) fn progress_channel(
    inner: Arc<dyn ProgressSink>,
) -> (Arc<ChannelSink>, ProgressStream, StageCell) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let stage: StageCell = Arc::new(Mutex::new(Stage::Loading));
    let sink = Arc::new(ChannelSink {
        sender,
        inner,
        stage: Arc::clone(&stage),
    });
    (sink, ProgressStream { receiver }, stage)
}

/// Wrap a spawned conversion.
pub(crate) fn conversion_task(
    handle: JoinHandle<Result<ConversionOutcome, ConversionError>>,
    stage: StageCell,
) -> ConversionTask {
    ConversionTask { handle, stage }
}
