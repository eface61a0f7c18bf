//! Upload coordination.
//!
//! [`UploadCoordinator`] packages an [`Mp3Artifact`] once, submits it to a
//! [`StorageRelay`] for a bounded number of attempts with linear backoff,
//! and releases the staged payload on every exit path, including when the
//! surrounding future is dropped by a deadline.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use tokio::time::Instant;

pub use crate::error::RelayError;
use crate::{
    artifact::Mp3Artifact,
    configuration::UploadOptions,
    error::{RelayErrorKind, UploadError},
    progress::{ProgressTracker, Stage},
};

/// HTTP status a relay uses for an oversized payload.
pub const PAYLOAD_TOO_LARGE: u16 = 413;

/// The request shape handed to a relay: base64 audio plus the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    /// Base64 (standard alphabet, padded) of the MP3 bytes.
    pub audio_payload: String,
    /// Target file name.
    pub file_name: String,
}

impl UploadPayload {
    /// Encode an artifact for transport.
    pub fn from_artifact(artifact: &Mp3Artifact) -> Self {
        Self {
            audio_payload: general_purpose::STANDARD.encode(artifact.bytes()),
            file_name: artifact.file_name().to_string(),
        }
    }

    /// Decode the transported bytes.
    pub fn audio_bytes(&self) -> Result<Vec<u8>, RelayError> {
        general_purpose::STANDARD
            .decode(&self.audio_payload)
            .map_err(|error| RelayError::protocol(format!("invalid audio payload: {error}")))
    }
}

/// What a relay reports for a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Store-side identifier.
    pub id: String,
    /// Final name in the store.
    pub name: String,
    /// Shareable link.
    pub link: String,
}

/// The remote store, seen through the relay contract.
#[async_trait]
pub trait StorageRelay: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Store one payload.
    async fn submit(&self, payload: &UploadPayload) -> Result<StoredFile, RelayError>;

    /// Drop anything staged for `file_name`. Called once per upload,
    /// whatever the outcome.
    async fn release(&self, _file_name: &str) {}
}

/// Classification of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The relay stored the file.
    Success,
    /// Worth trying again after a delay.
    Retryable(RelayError),
    /// Trying again would fail the same way.
    Fatal(RelayError),
}

impl AttemptOutcome {
    /// Classify a relay failure.
    pub fn classify(error: RelayError) -> Self {
        if is_fatal(&error) {
            AttemptOutcome::Fatal(error)
        } else {
            AttemptOutcome::Retryable(error)
        }
    }
}

/// Oversized payloads and credential failures are fatal; everything else
/// is retryable.
pub fn is_fatal(error: &RelayError) -> bool {
    error.status == Some(PAYLOAD_TOO_LARGE) || error.kind == RelayErrorKind::Auth
}

/// Record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// How it ended.
    pub outcome: AttemptOutcome,
    /// Time spent in the attempt.
    pub elapsed: Duration,
    /// Delay slept after the attempt, if another one followed.
    pub backoff: Option<Duration>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Store-side identifier.
    pub id: String,
    /// Final name in the store.
    pub name: String,
    /// Shareable link.
    pub link: String,
    /// Every attempt, in order.
    pub attempts: Vec<UploadAttempt>,
}

/// Releases the staged payload when dropped without an explicit release.
struct StagedPayload {
    relay: Arc<dyn StorageRelay>,
    payload: UploadPayload,
    released: bool,
}

impl StagedPayload {
    async fn release(mut self) {
        self.released = true;
        self.relay.release(&self.payload.file_name).await;
        log::debug!("Released staged upload {}", self.payload.file_name);
    }
}

impl Drop for StagedPayload {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let relay = Arc::clone(&self.relay);
        let file_name = self.payload.file_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    relay.release(&file_name).await;
                    log::debug!("Released abandoned upload {file_name}");
                });
            }
            Err(_) => log::warn!("No runtime to release abandoned upload {file_name}"),
        }
    }
}

/// Submits artifacts with retry, backoff and per-attempt deadlines.
#[derive(Clone)]
pub struct UploadCoordinator {
    relay: Arc<dyn StorageRelay>,
    options: UploadOptions,
}

impl UploadCoordinator {
    /// Coordinate uploads to `relay`.
    pub fn new(relay: Arc<dyn StorageRelay>, options: UploadOptions) -> Self {
        Self { relay, options }
    }

    /// The relay in use.
    pub fn relay(&self) -> &Arc<dyn StorageRelay> {
        &self.relay
    }

    /// Upload `artifact`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Fatal`] on the first fatal failure and
    /// [`UploadError::Exhausted`] with the last cause once every attempt
    /// failed.
    pub async fn upload(
        &self,
        artifact: &Mp3Artifact,
        tracker: &ProgressTracker,
    ) -> Result<UploadReceipt, UploadError> {
        let staged = StagedPayload {
            relay: Arc::clone(&self.relay),
            payload: UploadPayload::from_artifact(artifact),
            released: false,
        };
        let result = self.submit_with_retry(&staged.payload, tracker).await;
        staged.release().await;
        result
    }

    async fn submit_with_retry(
        &self,
        payload: &UploadPayload,
        tracker: &ProgressTracker,
    ) -> Result<UploadReceipt, UploadError> {
        let max_attempts = self.options.max_attempts.max(1);
        let limit = self.options.attempt_timeout;
        let mut attempts: Vec<UploadAttempt> = Vec::new();

        for number in 1..=max_attempts {
            tracker.emit(
                90,
                Stage::Uploading,
                format!("Uploading {} (attempt {number} of {max_attempts})", payload.file_name),
            );

            let started = Instant::now();
            let result = match tokio::time::timeout(limit, self.relay.submit(payload)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::timeout(limit)),
            };
            let elapsed = started.elapsed();

            let error = match result {
                Ok(stored) => {
                    attempts.push(UploadAttempt {
                        number,
                        outcome: AttemptOutcome::Success,
                        elapsed,
                        backoff: None,
                    });
                    log::info!("Uploaded {} on attempt {number}", stored.name);
                    return Ok(UploadReceipt {
                        id: stored.id,
                        name: stored.name,
                        link: stored.link,
                        attempts,
                    });
                }
                Err(error) => error,
            };

            if is_fatal(&error) {
                log::warn!("Upload attempt {number} failed fatally: {error}");
                return Err(UploadError::Fatal {
                    attempt: number,
                    cause: error,
                });
            }
            if number == max_attempts {
                log::warn!("Upload attempt {number} failed: {error}; no attempts left");
                return Err(UploadError::Exhausted {
                    attempts: number,
                    last: error,
                });
            }

            let delay = self.options.backoff_after(number);
            log::warn!("Upload attempt {number} failed: {error}; retrying in {delay:?}");
            attempts.push(UploadAttempt {
                number,
                outcome: AttemptOutcome::Retryable(error),
                elapsed,
                backoff: Some(delay),
            });
            tokio::time::sleep(delay).await;
        }

        Err(UploadError::Exhausted {
            attempts: max_attempts,
            last: RelayError::network("no attempt was made"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(matches!(
            AttemptOutcome::classify(RelayError::status(413, "too big")),
            AttemptOutcome::Fatal(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(RelayError::auth("expired")),
            AttemptOutcome::Fatal(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(RelayError::status(503, "busy")),
            AttemptOutcome::Retryable(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(RelayError::timeout(Duration::from_secs(1))),
            AttemptOutcome::Retryable(_)
        ));
    }

    #[test]
    fn payload_round_trips_bytes() {
        let artifact = Mp3Artifact::new(vec![0xFF, 0xFB, 0x00], "a.mp3".to_string());
        let payload = UploadPayload::from_artifact(&artifact);
        assert_eq!(payload.audio_payload, "//sA");
        assert_eq!(payload.audio_bytes().unwrap(), artifact.bytes());
    }
}
