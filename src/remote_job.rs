//! Service-backed transcoding.
//!
//! A remote conversion service is driven through the job contract in
//! [`ConversionJobApi`]: submit the video, poll the job, download the
//! result. [`RemoteJobTranscoder`] owns the poll loop and its deadline;
//! [`CloudConvertApi`] speaks the CloudConvert v2 REST API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    error::StrategyError,
    input::VideoInput,
    progress::CancellationToken,
    toolkit::{ToolkitCandidate, Transcoder},
};

/// State of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still queued or running.
    Pending,
    /// Finished; the MP3 can be fetched from `result_url`.
    Done {
        /// Download location of the converted file.
        result_url: String,
    },
    /// The service gave up on the job.
    Failed(String),
}

/// The remote job contract.
#[async_trait]
pub trait ConversionJobApi: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Check that the service is usable (credentials configured).
    async fn probe(&self) -> Result<(), StrategyError>;

    /// Upload the video and start an MP3 conversion. Returns the job id.
    async fn submit(&self, input: &VideoInput) -> Result<String, StrategyError>;

    /// Current state of `job_id`.
    async fn status(&self, job_id: &str) -> Result<JobStatus, StrategyError>;

    /// Fetch the converted file.
    async fn download(&self, result_url: &str) -> Result<Vec<u8>, StrategyError>;
}

/// Submits, polls every `poll_interval`, and downloads, all within a deadline.
#[derive(Clone)]
pub struct RemoteJobTranscoder {
    api: Arc<dyn ConversionJobApi>,
    poll_interval: Duration,
    job_deadline: Duration,
}

impl RemoteJobTranscoder {
    /// Defaults: poll every 2 s, give up after 10 minutes.
    pub fn new(api: Arc<dyn ConversionJobApi>) -> Self {
        Self {
            api,
            poll_interval: Duration::from_secs(2),
            job_deadline: Duration::from_secs(600),
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the overall job deadline.
    #[must_use]
    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    /// A toolkit candidate probing and wrapping this transcoder.
    pub fn into_candidate(self) -> ToolkitCandidate {
        let name = format!("remote-job ({})", self.api.name());
        let api = Arc::clone(&self.api);
        let transcoder: Arc<dyn Transcoder> = Arc::new(self);
        ToolkitCandidate::new(
            name,
            move || {
                let api = Arc::clone(&api);
                async move { api.probe().await }
            },
            move || Arc::clone(&transcoder),
        )
    }

    async fn run_job(
        &self,
        input: &VideoInput,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StrategyError> {
        let job_id = self.api.submit(input).await?;
        log::info!("Submitted conversion job {job_id} to {}", self.api.name());

        let mut polls = 0_u32;
        let result_url = loop {
            tokio::time::sleep(self.poll_interval).await;
            if cancellation.is_cancelled() {
                return Err(StrategyError::Cancelled);
            }
            polls += 1;
            match self.api.status(&job_id).await? {
                JobStatus::Pending => log::debug!("Job {job_id} pending (poll {polls})"),
                JobStatus::Done { result_url } => break result_url,
                JobStatus::Failed(message) => {
                    return Err(StrategyError::Transcode(format!("job {job_id} failed: {message}")));
                }
            }
        };

        log::debug!("Job {job_id} finished after {polls} polls");
        self.api.download(&result_url).await
    }
}

#[async_trait]
impl Transcoder for RemoteJobTranscoder {
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn transcode(
        &self,
        input: &VideoInput,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StrategyError> {
        tokio::time::timeout(self.job_deadline, self.run_job(input, cancellation))
            .await
            .map_err(|_| StrategyError::TimedOut(self.job_deadline))?
    }
}

const IMPORT_TASK: &str = "import-1";
const CONVERT_TASK: &str = "convert-1";
const EXPORT_TASK: &str = "export-1";

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    data: JobData,
}

#[derive(Debug, Deserialize)]
struct JobData {
    id: String,
    status: String,
    #[serde(default)]
    tasks: Vec<TaskData>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    form: Option<UploadForm>,
    #[serde(default)]
    files: Vec<ExportedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadForm {
    url: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExportedFile {
    url: String,
}

impl JobData {
    fn task(&self, name: &str) -> Option<&TaskData> {
        self.tasks.iter().find(|task| task.name == name)
    }

    fn to_status(&self) -> JobStatus {
        match self.status.as_str() {
            "finished" => match self
                .task(EXPORT_TASK)
                .and_then(|task| task.result.as_ref())
                .and_then(|result| result.files.first())
            {
                Some(file) => JobStatus::Done {
                    result_url: file.url.clone(),
                },
                None => JobStatus::Failed("finished without an exported file".to_string()),
            },
            "error" => {
                let message = self
                    .tasks
                    .iter()
                    .find(|task| task.status == "error")
                    .and_then(|task| task.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                JobStatus::Failed(message)
            }
            _ => JobStatus::Pending,
        }
    }
}

/// CloudConvert v2: `import/upload` then `convert` (mp3, 192 kbit/s) then
/// `export/url`.
pub struct CloudConvertApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CloudConvertApi {
    /// Service name.
    pub const NAME: &'static str = "cloudconvert";

    /// Client against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.cloudconvert.com/v2")
    }

    /// Client against another endpoint (sandbox or a test server).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn job_request() -> Value {
        json!({
            "tasks": {
                IMPORT_TASK: { "operation": "import/upload" },
                CONVERT_TASK: {
                    "operation": "convert",
                    "input": IMPORT_TASK,
                    "output_format": "mp3",
                    "audio_bitrate": 192
                },
                EXPORT_TASK: { "operation": "export/url", "input": CONVERT_TASK }
            }
        })
    }

    async fn read_job(response: reqwest::Response) -> Result<JobData, StrategyError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Transcode(format!(
                "{} answered {status}: {body}",
                Self::NAME
            )));
        }
        response
            .json::<JobEnvelope>()
            .await
            .map(|envelope| envelope.data)
            .map_err(|error| StrategyError::Transcode(format!("unreadable job response: {error}")))
    }
}

#[async_trait]
impl ConversionJobApi for CloudConvertApi {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self) -> Result<(), StrategyError> {
        if self.api_key.trim().is_empty() {
            return Err(StrategyError::Unsupported("CloudConvert API key".to_string()));
        }
        Ok(())
    }

    async fn submit(&self, input: &VideoInput) -> Result<String, StrategyError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::job_request())
            .send()
            .await
            .map_err(|error| StrategyError::Transcode(format!("job request: {error}")))?;
        let job = Self::read_job(response).await?;

        let form = job
            .task(IMPORT_TASK)
            .and_then(|task| task.result.as_ref())
            .and_then(|result| result.form.as_ref())
            .ok_or_else(|| StrategyError::Transcode("job has no upload form".to_string()))?;

        let mut upload = multipart::Form::new();
        for (key, value) in &form.parameters {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            upload = upload.text(key.clone(), value);
        }
        let file_name = if input.file_name().is_empty() { "video" } else { input.file_name() };
        let mut part =
            multipart::Part::bytes(input.data().to_vec()).file_name(file_name.to_string());
        if !input.media_type().is_empty() {
            part = part
                .mime_str(input.media_type())
                .map_err(|error| StrategyError::Transcode(format!("mime: {error}")))?;
        }
        upload = upload.part("file", part);

        let response = self
            .client
            .post(&form.url)
            .multipart(upload)
            .send()
            .await
            .map_err(|error| StrategyError::Transcode(format!("upload: {error}")))?;
        if !response.status().is_success() {
            return Err(StrategyError::Transcode(format!("upload answered {}", response.status())));
        }
        Ok(job.id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, StrategyError> {
        let response = self
            .client
            .get(format!("{}/jobs/{job_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|error| StrategyError::Transcode(format!("status request: {error}")))?;
        Ok(Self::read_job(response).await?.to_status())
    }

    async fn download(&self, result_url: &str) -> Result<Vec<u8>, StrategyError> {
        let response = self
            .client
            .get(result_url)
            .send()
            .await
            .map_err(|error| StrategyError::Transcode(format!("download: {error}")))?;
        if !response.status().is_success() {
            return Err(StrategyError::Transcode(format!(
                "download answered {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|error| StrategyError::Transcode(format!("download body: {error}")))
    }
}
