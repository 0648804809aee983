//! S3 backend tests against a scripted HTTP server on loopback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamforge::config::StorageConfig;
use streamforge::storage::{RetryPolicy, S3Storage, Storage, StorageError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Answers one request per connection with the next scripted response;
/// the last response repeats.
struct FakeS3 {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeS3 {
    async fn start(script: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let (status, body) = script[served.min(script.len() - 1)];
                served += 1;
                respond(stream, status, body, &log).await;
            }
        });

        Self { url, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn storage(&self) -> S3Storage {
        let config = StorageConfig {
            provider: "s3".into(),
            bucket: Some("media".into()),
            service_url: Some(self.url.clone()),
            region: Some("us-east-1".into()),
            access_key: Some("minio".into()),
            secret_key: Some("minio123".into()),
            ..StorageConfig::default()
        };
        S3Storage::new(&config).unwrap().with_retry(RetryPolicy {
            max_retries: 3,
            first_delay: Duration::from_millis(10),
        })
    }
}

async fn respond(stream: TcpStream, status: u16, body: &str, log: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(0) | Err(_) => return,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {
                let lower = header.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
    }
    let mut request_body = vec![0; content_length];
    if reader.read_exact(&mut request_body).await.is_err() {
        return;
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default();
    log.lock().unwrap().push(format!("{method} {path}"));

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let stream = reader.get_mut();
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[tokio::test]
async fn exists_retries_server_errors() {
    let s3 = FakeS3::start(vec![(503, ""), (500, ""), (200, "")]).await;

    assert!(s3.storage().exists("converted/movie.mp4").await.unwrap());
    assert_eq!(
        s3.requests(),
        vec!["HEAD /media/converted/movie.mp4"; 3]
    );
}

#[tokio::test]
async fn exists_is_false_for_missing_object() {
    let s3 = FakeS3::start(vec![(404, "")]).await;

    assert!(!s3.storage().exists("converted/movie.mp4").await.unwrap());
    assert_eq!(s3.requests().len(), 1);
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let s3 = FakeS3::start(vec![(403, "")]).await;

    let err = s3.storage().exists("converted/movie.mp4").await.unwrap_err();
    assert!(
        matches!(err, StorageError::Remote { status: Some(403), .. }),
        "{err}"
    );
    assert_eq!(s3.requests().len(), 1);
}

#[tokio::test]
async fn gives_up_after_three_retries() {
    let s3 = FakeS3::start(vec![(503, "")]).await;

    let err = s3.storage().delete("waveforms/a.png").await.unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert_eq!(
        s3.requests(),
        vec!["DELETE /media/waveforms/a.png"; 4]
    );
}

#[tokio::test]
async fn delete_succeeds_after_transient_error() {
    let s3 = FakeS3::start(vec![(502, ""), (204, "")]).await;

    s3.storage().delete("waveforms/a.png").await.unwrap();
    assert_eq!(s3.requests().len(), 2);
}

#[tokio::test]
async fn download_streams_object_body() {
    let s3 = FakeS3::start(vec![(200, "ftyp-moof-mdat")]).await;

    let mut reader = s3.storage().download("converted/movie.mp4").await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"ftyp-moof-mdat");
    assert_eq!(s3.requests(), vec!["GET /media/converted/movie.mp4"]);
}

#[tokio::test]
async fn download_of_missing_object_is_not_found() {
    let s3 = FakeS3::start(vec![(404, "")]).await;

    let err = s3.storage().download("converted/none.mp4").await.err().unwrap();
    assert!(matches!(err, StorageError::NotFound(ref key) if key == "converted/none.mp4"), "{err}");
}

#[tokio::test]
async fn connection_refused_is_not_retried() {
    // Bind and drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = StorageConfig {
        provider: "s3".into(),
        bucket: Some("media".into()),
        service_url: Some(format!("http://127.0.0.1:{port}")),
        region: Some("us-east-1".into()),
        access_key: Some("minio".into()),
        secret_key: Some("minio123".into()),
        ..StorageConfig::default()
    };
    // Default policy: a retry would take at least two seconds.
    let storage = S3Storage::new(&config).unwrap();

    let started = std::time::Instant::now();
    let err = storage.exists("converted/movie.mp4").await.unwrap_err();
    assert!(!err.is_transient(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn keys_are_validated_before_any_request() {
    let s3 = FakeS3::start(vec![(200, "")]).await;

    let err = s3.storage().exists("/converted/movie.mp4").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath(_)));
    assert!(s3.requests().is_empty());
}
