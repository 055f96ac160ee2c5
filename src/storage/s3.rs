use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::BlobStore;
use crate::error::StorageError;
use crate::transform::OutputFormat;

/// S3-backed blob store.
///
/// Works against AWS S3 and S3-compatible services. With a custom endpoint,
/// public URLs are path-style (`{endpoint}/{bucket}/{path}`); otherwise they
/// use the virtual-hosted AWS form (`https://{bucket}.s3.amazonaws.com/{path}`).
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
    identifier: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: impl Into<String>, endpoint: Option<String>) -> Self {
        let bucket = bucket.into();
        let identifier = format!("s3://{}", bucket);
        Self {
            client,
            bucket,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            identifier,
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public URL of the object at `path`.
    pub fn object_url(&self, path: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, self.bucket, path),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, path),
        }
    }

    fn location(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }

    /// Classify an SDK error, folding every flavor of 404 into `NotFound`.
    fn map_sdk_error<E>(&self, err: SdkError<E, HttpResponse>, path: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let status_is_404 = err
            .raw_response()
            .map(|r| r.status().as_u16() == 404)
            .unwrap_or(false);

        if status_is_404 {
            return StorageError::NotFound(self.location(path));
        }

        if let SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) = &err {
            return StorageError::Connection(DisplayErrorContext(&err).to_string());
        }

        let err_str = DisplayErrorContext(&err).to_string();
        if err_str.contains("NotFound") || err_str.contains("NoSuchKey") {
            return StorageError::NotFound(self.location(path));
        }

        StorageError::S3(err_str)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, data: Bytes, path: &str) -> Result<String, StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data));

        let content_type = path
            .rsplit_once('.')
            .and_then(|(_, ext)| OutputFormat::from_name(ext))
            .map(|f| f.content_type());
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|e| self.map_sdk_error(e, path))?;

        Ok(self.object_url(path))
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| self.map_sdk_error(e, path))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| self.map_sdk_error(e, path))?;

        Ok(())
    }

    async fn resolve_url(&self, path: &str) -> Result<String, StorageError> {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| self.map_sdk_error(e, path))?;

        Ok(self.object_url(path))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
