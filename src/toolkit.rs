//! External toolkit transcoding.
//!
//! The last-resort strategy hands the whole video to an out-of-process
//! transcoder that strips the video and writes MP3 directly, so the frame
//! encoder is skipped. Which transcoder is used is decided once per
//! [`ToolkitContext`] by walking an ordered list of [`ToolkitCandidate`]s,
//! each a capability probe paired with a constructor, through the same
//! [`FallbackChain`] the strategy selector uses.

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{process::Command, sync::OnceCell};

use crate::{
    error::StrategyError,
    fallback::FallbackChain,
    input::VideoInput,
    progress::CancellationToken,
    strategy::{Extracted, ExtractionStrategy, StrategyContext},
};

/// Boxed future returned by a candidate's capability probe.
pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), StrategyError>> + Send>>;

type ProbeFn = dyn Fn() -> ProbeFuture + Send + Sync;
type ConstructFn = dyn Fn() -> Arc<dyn Transcoder> + Send + Sync;

/// Converts a whole video file into MP3 bytes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produce MP3 bytes for `input`.
    async fn transcode(
        &self,
        input: &VideoInput,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StrategyError>;
}

/// A capability probe paired with the constructor it guards.
#[derive(Clone)]
pub struct ToolkitCandidate {
    name: String,
    probe: Arc<ProbeFn>,
    construct: Arc<ConstructFn>,
}

impl ToolkitCandidate {
    /// Pair a probe with a constructor.
    pub fn new<P, Fut, C>(name: impl Into<String>, probe: P, construct: C) -> Self
    where
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StrategyError>> + Send + 'static,
        C: Fn() -> Arc<dyn Transcoder> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            probe: Arc::new(move || Box::pin(probe()) as ProbeFuture),
            construct: Arc::new(construct),
        }
    }

    /// The local `ffmpeg` executable.
    pub fn ffmpeg_command(transcoder: FfmpegCommandTranscoder) -> Self {
        let probe_target = transcoder.clone();
        let transcoder: Arc<dyn Transcoder> = Arc::new(transcoder);
        Self::new(
            FfmpegCommandTranscoder::NAME,
            move || {
                let target = probe_target.clone();
                async move { target.probe().await }
            },
            move || Arc::clone(&transcoder),
        )
    }

    /// Candidate name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the probe and, if it passes, construct the transcoder.
    pub async fn load(&self) -> Result<Arc<dyn Transcoder>, StrategyError> {
        (self.probe)().await?;
        Ok((self.construct)())
    }
}

/// Loads a transcoder on first use and keeps it for the process.
///
/// Requests share the loaded transcoder through this value; nothing is kept
/// in a global. A failed load is not cached, so a later request probes again.
pub struct ToolkitContext {
    candidates: FallbackChain<ToolkitCandidate>,
    loaded: OnceCell<Arc<dyn Transcoder>>,
}

impl ToolkitContext {
    /// Build a context over candidates in preference order.
    pub fn new(candidates: Vec<ToolkitCandidate>) -> Self {
        Self {
            candidates: candidates
                .into_iter()
                .map(|candidate| (candidate.name().to_string(), candidate))
                .collect(),
            loaded: OnceCell::new(),
        }
    }

    /// Candidate names in preference order.
    pub fn candidate_names(&self) -> Vec<String> {
        self.candidates.names().map(str::to_string).collect()
    }

    /// Returns `true` once a transcoder has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// The loaded transcoder, loading it on first call.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Unsupported`] listing every candidate's
    /// failure when none can be loaded.
    pub async fn transcoder(&self) -> Result<Arc<dyn Transcoder>, StrategyError> {
        self.loaded
            .get_or_try_init(|| async {
                if self.candidates.is_empty() {
                    return Err(StrategyError::Unsupported("external toolkit".to_string()));
                }
                self.candidates
                    .run(|candidate| async move { candidate.load().await }, |_, _| {})
                    .await
                    .map(|(transcoder, _)| {
                        log::info!("Loaded external toolkit {}", transcoder.name());
                        transcoder
                    })
                    .map_err(|trace| {
                        let causes: Vec<String> = trace
                            .failures
                            .iter()
                            .map(|(name, error)| format!("{name}: {error}"))
                            .collect();
                        StrategyError::Unsupported(format!(
                            "external toolkit ({})",
                            causes.join("; ")
                        ))
                    })
            })
            .await
            .cloned()
    }
}

/// Strategy 3: have the external toolkit write the MP3.
pub struct ExternalToolkitStrategy {
    toolkit: Arc<ToolkitContext>,
}

impl ExternalToolkitStrategy {
    /// Name used in logs and traces.
    pub const NAME: &'static str = "external-toolkit";

    /// Create the strategy over a shared toolkit context.
    pub fn new(toolkit: Arc<ToolkitContext>) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl ExtractionStrategy for ExternalToolkitStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self) -> Result<(), StrategyError> {
        self.toolkit.transcoder().await.map(|_| ())
    }

    async fn extract(
        &self,
        input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Extracted, StrategyError> {
        let transcoder = self.toolkit.transcoder().await?;
        context.report(1, 4, format!("Transcoding with {}", transcoder.name()));

        let bytes = transcoder.transcode(input, &context.cancellation).await?;
        if bytes.is_empty() {
            return Err(StrategyError::Transcode(format!(
                "{} produced an empty file",
                transcoder.name()
            )));
        }
        context.report(4, 4, "Transcode finished");
        Ok(Extracted::Mp3(bytes))
    }
}

/// Runs the `ffmpeg` executable: strip video, `libmp3lame`, 192 kbit/s, 44.1 kHz.
#[derive(Debug, Clone)]
pub struct FfmpegCommandTranscoder {
    program: PathBuf,
    timeout: Duration,
    bitrate: String,
    sample_rate: u32,
}

impl Default for FfmpegCommandTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegCommandTranscoder {
    /// Candidate and log name.
    pub const NAME: &'static str = "ffmpeg-cli";

    /// Use `program` as the executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(600),
            bitrate: "192k".to_string(),
            sample_rate: 44_100,
        }
    }

    /// Limit for one transcode.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for transcoding `source` into `target`.
    pub fn arguments(&self, source: &Path, target: &Path) -> Vec<String> {
        vec![
            "-nostdin".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.display().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-ab".to_string(),
            self.bitrate.clone(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            target.display().to_string(),
        ]
    }

    /// Check that the executable runs.
    pub async fn probe(&self) -> Result<(), StrategyError> {
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new(&self.program)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match status {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(StrategyError::Unsupported(format!(
                "{} (exited with {status})",
                self.program.display()
            ))),
            Ok(Err(error)) => Err(StrategyError::Unsupported(format!(
                "{} ({error})",
                self.program.display()
            ))),
            Err(_) => Err(StrategyError::Unsupported(format!(
                "{} (no answer to -version)",
                self.program.display()
            ))),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegCommandTranscoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn transcode(
        &self,
        input: &VideoInput,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StrategyError> {
        let scratch = tempfile::Builder::new().prefix("mp3drop-toolkit-").tempdir()?;
        let extension = input.extension().unwrap_or_else(|| "bin".to_string());
        let source = scratch.path().join(format!("input.{extension}"));
        let target = scratch.path().join("output.mp3");
        tokio::fs::write(&source, input.data()).await?;

        if cancellation.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }

        log::debug!("Running {} on {}", self.program.display(), source.display());
        let child = Command::new(&self.program)
            .args(self.arguments(&source, &target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child) => result
                .map_err(|_| StrategyError::TimedOut(self.timeout))?
                .map_err(|error| {
                    let program = self.program.display();
                    StrategyError::Transcode(format!("cannot run {program}: {error}"))
                })?,
            () = cancellation.cancelled() => {
                log::debug!("Stopping {} on cancellation", self.program.display());
                return Err(StrategyError::Cancelled);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let cause = stderr.lines().last().unwrap_or("no diagnostic output");
            return Err(StrategyError::Transcode(format!("{} ({cause})", output.status)));
        }

        Ok(tokio::fs::read(&target).await?)
    }
}
