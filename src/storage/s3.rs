use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
};
use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

use super::{ArchiveStore, ObjectUpload, StorageError, StorageResult, validate_key};
use crate::config::S3StorageConfig;

/// S3-compatible archive storage.
///
/// Uploads use the multipart API so objects of any size stream through a
/// fixed-size part buffer. Works with:
/// - AWS S3
/// - MinIO
/// - Cloudflare R2
/// - Any S3-compatible service
///
/// Requires the `s3-storage` feature.
pub struct S3ArchiveStore {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

impl S3ArchiveStore {
    pub async fn new(config: S3StorageConfig) -> StorageResult<Self> {
        info!(bucket = %config.bucket, "Initializing S3 archive storage");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None, // session token
                None, // expiry
                "tessera-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn ensure_container(&self) -> StorageResult<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut request = self.client.create_bucket().bucket(&self.config.bucket);
        // us-east-1 rejects an explicit location constraint.
        if let Some(region) = self.config.region.as_deref()
            && region != "us-east-1"
            && self.config.endpoint.is_none()
        {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("Created archive bucket");
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_bucket_already_owned_by_you()
                    || service_error.is_bucket_already_exists()
                {
                    debug!("Archive bucket already exists");
                    Ok(())
                } else {
                    error!(error = %service_error, "Failed to create archive bucket");
                    Err(StorageError::S3(service_error.to_string()))
                }
            }
        }
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn start_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn ObjectUpload>> {
        validate_key(key)?;

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to start multipart upload");
                StorageError::S3(e.to_string())
            })?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::S3("CreateMultipartUpload returned no upload id".into()))?
            .to_string();

        debug!(key, upload_id, "Started multipart upload");
        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            upload_id,
            part_size: self.config.part_size_bytes(),
            buffer: Vec::new(),
            parts: Vec::new(),
        }))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::S3(service_error.to_string()))
                }
            }
        }
    }

    fn url(&self, key: &str) -> String {
        match &self.config.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.config.bucket,
                key
            ),
            None => format!("s3://{}/{}", self.config.bucket, key),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

struct S3Upload {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    content_type: String,
    upload_id: String,
    part_size: usize,
    buffer: Vec<u8>,
    parts: Vec<CompletedPart>,
}

impl S3Upload {
    async fn upload_part(&mut self, body: Vec<u8>) -> StorageResult<()> {
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| StorageError::S3("too many parts".into()))?;
        let size = body.len();

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        debug!(part_number, size, "Uploaded part");
        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(output.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<()> {
        if self.parts.is_empty() && self.buffer.is_empty() {
            // A multipart upload needs at least one part; write empty objects directly.
            self.abort_multipart().await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .content_type(&self.content_type)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?;
            return Ok(());
        }

        if !self.buffer.is_empty() {
            let body = std::mem::take(&mut self.buffer);
            self.upload_part(body).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut self.parts)))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }

    async fn abort_multipart(&self) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectUpload for S3Upload {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= self.part_size {
            let rest = self.buffer.split_off(self.part_size);
            let body = std::mem::replace(&mut self.buffer, rest);
            self.upload_part(body).await?;
        }
        Ok(())
    }

    async fn complete(mut self: Box<Self>) -> StorageResult<()> {
        match self.finish().await {
            Ok(()) => {
                info!(bucket = %self.bucket, key = %self.key, "Archive object stored in S3");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self.abort_multipart().await {
                    warn!(error = %abort_err, key = %self.key, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.abort_multipart().await
    }
}
