//! Storage relay integration tests.
//!
//! The HTTP relay is exercised against a one-shot loopback server that
//! captures the raw request and replies with a canned response.

use std::sync::Arc;

use mp3drop::{
    CredentialProvider, EnvCredentials, HttpStorageRelay, LocalFolderRelay, Mp3Artifact,
    ProgressTracker, RelayErrorKind, RelayRequest, RelaySuccess, StaticCredentials, StorageRelay,
    UploadCoordinator, UploadError, UploadOptions, UploadPayload,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn payload(name: &str) -> UploadPayload {
    UploadPayload::from_artifact(&Mp3Artifact::new(vec![0xFF, 0xFB, 0x00], name.to_string()))
}

fn header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = socket.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(end) = header_end(&buffer) {
            let headers = String::from_utf8_lossy(&buffer[..end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });
    (format!("http://{address}/upload"), handle)
}

// ── Wire format ────────────────────────────────────────────────────

#[test]
fn request_shape_matches_relay_contract() {
    let request = RelayRequest {
        audio_payload: "//sA".to_string(),
        file_name: "song.mp3".to_string(),
        parent_folder_id: Some("folder-9".to_string()),
    };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "audioPayload": "//sA",
            "fileName": "song.mp3",
            "parentFolderId": "folder-9"
        })
    );

    let parsed: RelayRequest =
        serde_json::from_str(r#"{"audioPayload":"AA==","fileName":"x"}"#).unwrap();
    assert_eq!(parsed.parent_folder_id, None);
}

#[test]
fn success_shape_parses() {
    let body = r#"{"id":"abc","name":"song.mp3","link":"https://drive.example.com/abc"}"#;
    let parsed: RelaySuccess = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.id, "abc");
    assert_eq!(parsed.link, "https://drive.example.com/abc");
}

// ── HttpStorageRelay ───────────────────────────────────────────────

#[tokio::test]
async fn http_relay_posts_json_with_bearer_token() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"id":"abc","name":"song.mp3","link":"https://drive.example.com/abc"}"#,
    )
    .await;
    let relay = HttpStorageRelay::new(url)
        .with_credentials(Arc::new(StaticCredentials::new("secret-token")))
        .with_folder_id("folder-9");

    let stored = relay.submit(&payload("song.mp3")).await.unwrap();
    assert_eq!(stored.id, "abc");
    assert_eq!(stored.name, "song.mp3");
    assert_eq!(stored.link, "https://drive.example.com/abc");

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /upload HTTP/1.1"));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    assert!(request.contains(r#""audioPayload":"//sA""#));
    assert!(request.contains(r#""fileName":"song.mp3""#));
    assert!(request.contains(r#""parentFolderId":"folder-9""#));
}

#[tokio::test]
async fn http_relay_maps_error_body_and_status() {
    let (url, server) =
        serve_once("413 Payload Too Large", r#"{"error":"file exceeds quota"}"#).await;
    let relay = HttpStorageRelay::new(url);

    let error = relay.submit(&payload("song.mp3")).await.unwrap_err();
    assert_eq!(error.kind, RelayErrorKind::Status);
    assert_eq!(error.status, Some(413));
    assert_eq!(error.message, "file exceeds quota");
    server.await.unwrap();
}

#[tokio::test]
async fn http_relay_rejects_unreadable_success_body() {
    let (url, server) = serve_once("200 OK", "<html>oops</html>").await;
    let error = HttpStorageRelay::new(url).submit(&payload("song.mp3")).await.unwrap_err();
    assert_eq!(error.kind, RelayErrorKind::Protocol);
    server.await.unwrap();
}

#[tokio::test]
async fn http_relay_reports_refused_connection_as_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let error = HttpStorageRelay::new(format!("http://{address}/upload"))
        .submit(&payload("song.mp3"))
        .await
        .unwrap_err();
    assert_eq!(error.kind, RelayErrorKind::Network);
}

#[tokio::test]
async fn missing_credentials_fail_before_sending() {
    let relay = HttpStorageRelay::new("http://127.0.0.1:9/upload")
        .with_credentials(Arc::new(EnvCredentials::new("MP3DROP_TEST_UNSET_TOKEN")));
    let error = relay.submit(&payload("song.mp3")).await.unwrap_err();
    assert_eq!(error.kind, RelayErrorKind::Auth);
}

#[tokio::test]
async fn env_credentials_read_the_variable() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("MP3DROP_TEST_RELAY_TOKEN", "from-env") };
    let token = EnvCredentials::new("MP3DROP_TEST_RELAY_TOKEN").bearer_token().await.unwrap();
    assert_eq!(token, "from-env");
}

// ── LocalFolderRelay ───────────────────────────────────────────────

#[tokio::test]
async fn local_relay_writes_file_and_links_it() {
    let directory = tempfile::tempdir().unwrap();
    let relay = LocalFolderRelay::new(directory.path().join("drops"));

    let stored = relay.submit(&payload("Episode 1")).await.unwrap();
    assert_eq!(stored.name, "Episode 1.mp3");
    assert!(stored.link.starts_with("file://"));
    assert!(!stored.id.is_empty());

    let written = std::fs::read(directory.path().join("drops").join("Episode 1.mp3")).unwrap();
    assert_eq!(written, vec![0xFF, 0xFB, 0x00]);

    relay.release("Episode 1").await;
    assert!(!directory.path().join("drops").join("Episode 1.mp3.partial").exists());
}

#[tokio::test]
async fn local_relay_limit_is_fatal_for_the_coordinator() {
    let directory = tempfile::tempdir().unwrap();
    let relay = Arc::new(LocalFolderRelay::new(directory.path()).with_max_bytes(2));
    let coordinator = UploadCoordinator::new(relay, UploadOptions::new());

    let artifact = Mp3Artifact::new(vec![0xFF, 0xFB, 0x00], "big.mp3".to_string());
    let error = coordinator.upload(&artifact, &ProgressTracker::silent()).await.unwrap_err();

    assert!(matches!(
        error,
        UploadError::Fatal { attempt: 1, ref cause } if cause.status == Some(413)
    ));
    assert!(!directory.path().join("big.mp3").exists());
}

#[tokio::test]
async fn invalid_base64_is_a_protocol_error() {
    let directory = tempfile::tempdir().unwrap();
    let relay = LocalFolderRelay::new(directory.path());
    let payload = UploadPayload {
        audio_payload: "not base64!".to_string(),
        file_name: "x.mp3".to_string(),
    };
    let error = relay.submit(&payload).await.unwrap_err();
    assert_eq!(error.kind, RelayErrorKind::Protocol);
}
