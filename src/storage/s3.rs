//! S3-compatible object storage.
//!
//! Objects are addressed path-style (`{service_url}/{bucket}/{key}`) so the
//! backend also works against MinIO and other S3-compatible services.
//! Streams at least one part long are sent as a multipart upload; each part
//! is buffered, so every request can be retried on its own.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use backon::{ExponentialBuilder, Retryable};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ObjectReader, Storage, StorageError};
use crate::config::StorageConfig;

/// Size of one multipart upload part.
pub const PART_SIZE: usize = 10 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential backoff for transient S3 failures (timeouts, 408, 5xx).
///
/// The default waits 2s, 4s and 8s between four attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub first_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            first_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, fails permanently, or the retries
    /// are used up.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        attempt: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.first_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries);

        attempt
            .retry(backoff)
            .when(StorageError::is_transient)
            .notify(|err, delay| {
                tracing::warn!("{operation} failed: {err}. Retrying in {delay:?}");
            })
            .await
    }
}

pub struct S3Storage {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3Storage {
    /// Build a client from the `[storage]` section. Every S3 setting is
    /// required; no request is made until the first operation.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let bucket = required(&config.bucket, "bucket")?;
        let service_url = required(&config.service_url, "service_url")?;
        let region = required(&config.region, "region")?;
        let access_key = required(&config.access_key, "access_key")?;
        let secret_key = required(&config.secret_key, "secret_key")?;

        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(service_url)
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "streamforge-config",
            ))
            .force_path_style(true)
            // Retries are driven by `RetryPolicy`.
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .build(),
            )
            .build();

        tracing::info!("S3 storage: bucket {bucket} at {service_url} ({region})");
        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, body: &[u8]) -> Result<(), StorageError> {
        self.retry
            .run("PutObject", move || {
                let body = ByteStream::from(body.to_vec());
                async move {
                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .body(body)
                        .send()
                        .await
                        .map_err(|e| remote("PutObject", e))?;
                    Ok(())
                }
            })
            .await
    }

    async fn multipart_upload(
        &self,
        key: &str,
        first: Vec<u8>,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let upload_id = self
            .retry
            .run("CreateMultipartUpload", move || async move {
                let created = self
                    .client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| remote("CreateMultipartUpload", e))?;
                created
                    .upload_id()
                    .map(str::to_string)
                    .ok_or_else(|| StorageError::remote("CreateMultipartUpload", "no upload id"))
            })
            .await?;

        match self.upload_parts(key, &upload_id, first, data).await {
            Ok(total) => Ok(total),
            Err(e) => {
                let aborted = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = aborted {
                    tracing::warn!(
                        "Failed to abort multipart upload of {key}: {}",
                        DisplayErrorContext(&abort)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let mut completed = Vec::new();
        let mut total = 0u64;
        let mut part = first;

        while !part.is_empty() {
            let part_number = i32::try_from(completed.len() + 1)
                .map_err(|_| StorageError::remote("UploadPart", "too many parts"))?;
            let body = &part;
            let e_tag = self
                .retry
                .run("UploadPart", move || {
                    let stream = ByteStream::from(body.clone());
                    async move {
                        let uploaded = self
                            .client
                            .upload_part()
                            .bucket(&self.bucket)
                            .key(key)
                            .upload_id(upload_id)
                            .part_number(part_number)
                            .body(stream)
                            .send()
                            .await
                            .map_err(|e| remote("UploadPart", e))?;
                        Ok(uploaded.e_tag().map(str::to_string))
                    }
                })
                .await?;

            tracing::debug!("Uploaded part {part_number} of {key} ({} bytes)", part.len());
            total += part.len() as u64;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(e_tag)
                    .build(),
            );
            part = read_part(data).await?;
        }

        let manifest = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();
        self.retry
            .run("CompleteMultipartUpload", move || {
                let manifest = manifest.clone();
                async move {
                    self.client
                        .complete_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .multipart_upload(manifest)
                        .send()
                        .await
                        .map_err(|e| remote("CompleteMultipartUpload", e))?;
                    Ok(())
                }
            })
            .await?;

        Ok(total)
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn upload_stream(
        &self,
        path: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let key = validate_key(path)?;
        let started = std::time::Instant::now();

        let first = read_part(data).await?;
        let total = if first.len() < PART_SIZE {
            let len = first.len() as u64;
            self.put_object(key, &first).await?;
            len
        } else {
            self.multipart_upload(key, first, data).await?
        };

        tracing::info!(
            "Uploaded to S3: {key} ({total} bytes, {}ms)",
            started.elapsed().as_millis()
        );
        Ok(total)
    }

    async fn download(&self, path: &str) -> Result<ObjectReader, StorageError> {
        let key = validate_key(path)?;
        let object = self
            .retry
            .run("GetObject", move || async move {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| remote("GetObject", e))
            })
            .await
            .map_err(|e| not_found_as(e, path))?;

        Ok(Box::new(Box::pin(object.body.into_async_read())))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = validate_key(path)?;
        self.retry
            .run("DeleteObject", move || async move {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| remote("DeleteObject", e))?;
                Ok(())
            })
            .await?;
        tracing::debug!("Deleted from S3: {key}");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let key = validate_key(path)?;
        let head = self
            .retry
            .run("HeadObject", move || async move {
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| remote("HeadObject", e))
            })
            .await;

        match head {
            Ok(_) => Ok(true),
            Err(StorageError::Remote {
                status: Some(404), ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, StorageError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(StorageError::MissingSetting(name))
}

/// Keys are used as-is, apart from rejecting ones S3 tools handle badly.
fn validate_key(path: &str) -> Result<&str, StorageError> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

/// Read up to one part. Shorter than [`PART_SIZE`] only at end of stream.
async fn read_part(data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Vec<u8>, StorageError> {
    let mut part = Vec::new();
    (&mut *data)
        .take(PART_SIZE as u64)
        .read_to_end(&mut part)
        .await?;
    Ok(part)
}

fn remote<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let timed_out = match &err {
        SdkError::TimeoutError(_) => true,
        SdkError::DispatchFailure(failure) => failure.is_timeout(),
        _ => false,
    };
    StorageError::Remote {
        operation,
        status,
        timed_out,
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn not_found_as(err: StorageError, path: &str) -> StorageError {
    match err {
        StorageError::Remote {
            status: Some(404), ..
        } => StorageError::NotFound(path.to_string()),
        other => other,
    }
}
