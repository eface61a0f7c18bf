//! Storage relay implementations.
//!
//! [`HttpStorageRelay`] posts the upload request shape to a relay endpoint
//! with a bearer token from a [`CredentialProvider`]. [`LocalFolderRelay`]
//! stands in for the cloud folder by writing into a local directory.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    artifact::relay_file_name,
    error::{AuthError, RelayError},
    upload::{PAYLOAD_TOO_LARGE, StorageRelay, StoredFile, UploadPayload},
};

/// Supplies a bearer credential. Refresh is the provider's business.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid token.
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError("empty token".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every request, so an
/// external refresher can rotate it.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    variable: String,
}

impl EnvCredentials {
    /// Read from `variable`.
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        match std::env::var(&self.variable) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(AuthError(format!("{} is not set", self.variable))),
        }
    }
}

/// Request body posted to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Base64 MP3 bytes.
    pub audio_payload: String,
    /// Target file name.
    pub file_name: String,
    /// Destination folder, when the relay does not fix one itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<String>,
}

/// Success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySuccess {
    /// Store-side identifier.
    pub id: String,
    /// Final name.
    pub name: String,
    /// Shareable link.
    pub link: String,
}

/// Failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFailure {
    /// Human-readable cause.
    pub error: String,
}

/// Posts uploads to an HTTP relay.
pub struct HttpStorageRelay {
    client: reqwest::Client,
    endpoint: String,
    folder_id: Option<String>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpStorageRelay {
    /// Relay at `endpoint` without credentials.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            folder_id: None,
            credentials: None,
        }
    }

    /// Send a bearer token from `provider` with every request.
    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Target a specific folder.
    #[must_use]
    pub fn with_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// The relay endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StorageRelay for HttpStorageRelay {
    fn name(&self) -> &str {
        "http-relay"
    }

    async fn submit(&self, payload: &UploadPayload) -> Result<StoredFile, RelayError> {
        let body = RelayRequest {
            audio_payload: payload.audio_payload.clone(),
            file_name: payload.file_name.clone(),
            parent_folder_id: self.folder_id.clone(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(provider) = &self.credentials {
            request = request.bearer_auth(provider.bearer_token().await?);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RelayError::network(error.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| RelayError::network(format!("reading response: {error}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<RelayFailure>(&text)
                .map(|failure| failure.error)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("relay error").to_string());
            return Err(RelayError::status(status.as_u16(), message));
        }

        let success: RelaySuccess = serde_json::from_str(&text)
            .map_err(|error| RelayError::protocol(format!("unexpected relay response: {error}")))?;
        Ok(StoredFile {
            id: success.id,
            name: success.name,
            link: success.link,
        })
    }
}

/// Deposits uploads into a local directory and links them with `file://`.
///
/// Files are written under a `.partial` name and renamed when complete;
/// [`release`](StorageRelay::release) removes any leftover partial file.
#[derive(Debug, Clone)]
pub struct LocalFolderRelay {
    directory: PathBuf,
    max_bytes: Option<u64>,
}

impl LocalFolderRelay {
    /// Store into `directory`, creating it on first upload.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_bytes: None,
        }
    }

    /// Reject payloads above `limit` with status 413.
    #[must_use]
    pub fn with_max_bytes(mut self, limit: u64) -> Self {
        self.max_bytes = Some(limit);
        self
    }

    /// The target directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn partial_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.partial"))
    }
}

#[async_trait]
impl StorageRelay for LocalFolderRelay {
    fn name(&self) -> &str {
        "local-folder"
    }

    async fn submit(&self, payload: &UploadPayload) -> Result<StoredFile, RelayError> {
        let bytes = payload.audio_bytes()?;
        if let Some(limit) = self.max_bytes
            && bytes.len() as u64 > limit
        {
            return Err(RelayError::status(
                PAYLOAD_TOO_LARGE,
                format!("{} bytes exceeds the {limit} byte limit", bytes.len()),
            ));
        }

        let name = relay_file_name(&payload.file_name);
        let io_error = |error: std::io::Error| {
            RelayError::network(format!("{}: {error}", self.directory.display()))
        };

        tokio::fs::create_dir_all(&self.directory).await.map_err(io_error)?;
        let partial = self.partial_path(&name);
        let target = self.directory.join(&name);
        tokio::fs::write(&partial, &bytes).await.map_err(io_error)?;
        tokio::fs::rename(&partial, &target).await.map_err(io_error)?;
        let absolute = tokio::fs::canonicalize(&target).await.map_err(io_error)?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        log::debug!("Stored {} bytes at {}", bytes.len(), absolute.display());

        Ok(StoredFile {
            id: format!("{stamp:x}"),
            name,
            link: format!("file://{}", absolute.display()),
        })
    }

    async fn release(&self, file_name: &str) {
        let partial = self.partial_path(&relay_file_name(file_name));
        if tokio::fs::remove_file(&partial).await.is_ok() {
            log::debug!("Removed partial upload {}", partial.display());
        }
    }
}
