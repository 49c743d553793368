//! Pre-signed GET URLs for non-sensitive media.
//!
//! Works against any S3-compatible store (AWS S3, Cloudflare R2, MinIO).

use crate::config::StorageConfig;
use crate::Error;
use async_trait::async_trait;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::presigning::PresigningConfig;
use std::time::{Duration, UNIX_EPOCH};

/// SigV4 caps pre-signed URLs at seven days.
pub const MAX_PRESIGN_SECS: u64 = 604_800;

/// A signed URL and the Unix second it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: u64,
}

#[async_trait]
pub trait Presigner: Send + Sync {
    /// URL granting GET on `key` from `now_secs` for `ttl`, capped at
    /// [`MAX_PRESIGN_SECS`]. `expires_at` reflects the cap.
    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        now_secs: u64,
    ) -> Result<PresignedUrl, Error>;
}

pub struct S3Presigner {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
}

impl std::fmt::Debug for S3Presigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Presigner")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Presigner {
    /// `None` when no storage endpoint is configured.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, Error> {
        if config.endpoint.is_empty() {
            return Ok(None);
        }
        if config.bucket.is_empty()
            || config.access_key_id.is_empty()
            || config.secret_access_key.is_empty()
        {
            return Err(Error::Config(
                "storage.bucket, access_key_id and secret_access_key are required with storage.endpoint"
                    .into(),
            ));
        }

        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid storage.endpoint: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(Error::Config("storage.endpoint has no host".into()));
        }
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose().to_string(),
            None,
            None,
            "pack-gate-config",
        );

        // Checksum headers would end up in the signed header set, which a
        // browser fetching the URL never sends.
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(config.path_style)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Ok(Some(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            endpoint,
        }))
    }
}

#[async_trait]
impl Presigner for S3Presigner {
    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        now_secs: u64,
    ) -> Result<PresignedUrl, Error> {
        let expires_secs = ttl.as_secs().clamp(1, MAX_PRESIGN_SECS);
        let presigning = PresigningConfig::builder()
            .start_time(UNIX_EPOCH + Duration::from_secs(now_secs))
            .expires_in(Duration::from_secs(expires_secs))
            .build()
            .map_err(|e| Error::Internal(format!("presign config: {e}")))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| Error::Internal(format!("presign: {e}")))?;

        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at: now_secs + expires_secs,
        })
    }
}

/// Whether `key` may be pre-signed: under a public prefix and not under the
/// watermarked content prefix.
pub fn check_presignable<'a>(
    key: &'a str,
    content_prefix: &str,
    public_prefixes: &[String],
) -> Result<&'a str, Error> {
    let key = crate::content_key::validate_object_key(key)?;
    if !content_prefix.is_empty() && key.starts_with(content_prefix) {
        return Err(Error::Forbidden("watermark_required"));
    }
    if !public_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
        return Err(Error::invalid(
            "invalid_content_key",
            "key is not under a public prefix",
        ));
    }
    Ok(key)
}
