//! Archive storage configuration.
//!
//! Archive objects are written to one of:
//! - **Filesystem**: a local (or mounted) directory
//! - **S3**: any S3-compatible object store (AWS, MinIO, R2, ...)
//!
//! # Example Configuration
//!
//! ```toml
//! [storage]
//! type = "s3"
//! bucket = "archive"
//! region = "us-east-1"
//! # Credentials via env vars AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
//! # or IAM role
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where archive objects are written.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StorageConfig {
    /// Not configured. Rejected by validation.
    #[default]
    None,

    /// Store archive objects below a local directory.
    Filesystem(FilesystemStorageConfig),

    /// Store archive objects in an S3-compatible bucket.
    S3(S3StorageConfig),
}

impl StorageConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, StorageConfig::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StorageConfig::None => Ok(()),
            StorageConfig::Filesystem(c) => c.validate(),
            StorageConfig::S3(c) => c.validate(),
        }
    }
}

/// S3-compatible object storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    /// Bucket name. Created on first use if it does not exist.
    pub bucket: String,

    /// AWS region (e.g., "us-east-1").
    /// For non-AWS S3-compatible services, use their region name.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services.
    /// Examples:
    /// - MinIO: "http://localhost:9000"
    /// - R2: "https://<account-id>.r2.cloudflarestorage.com"
    #[serde(default)]
    pub endpoint: Option<String>,

    /// AWS access key ID.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// AWS secret access key.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs instead of virtual-hosted style.
    /// Required for MinIO and some S3-compatible services.
    #[serde(default)]
    pub force_path_style: bool,

    /// Multipart upload part size in MiB. S3 requires at least 5 MiB for
    /// every part except the last.
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: u32,
}

impl std::fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "****"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("part_size_mb", &self.part_size_mb)
            .finish()
    }
}

impl S3StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "S3 bucket name cannot be empty".into(),
            ));
        }
        // Region is required unless using a custom endpoint
        if self.region.is_none() && self.endpoint.is_none() {
            return Err(ConfigError::Validation(
                "S3 requires either 'region' or 'endpoint' to be specified".into(),
            ));
        }
        if self.part_size_mb < 5 {
            return Err(ConfigError::Validation(
                "S3 part_size_mb must be at least 5".into(),
            ));
        }
        Ok(())
    }

    /// Part size in bytes.
    pub fn part_size_bytes(&self) -> usize {
        self.part_size_mb as usize * 1024 * 1024
    }
}

fn default_part_size_mb() -> u32 {
    8
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemStorageConfig {
    /// Root directory for archive objects. Object keys become relative
    /// paths below it.
    pub path: String,

    /// Create the root directory if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// File permissions for archive objects (Unix only, octal).
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Directory permissions for created directories (Unix only, octal).
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl FilesystemStorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "Filesystem storage path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_file_mode() -> u32 {
    0o640
}

fn default_dir_mode() -> u32 {
    0o750
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_requires_region_or_endpoint() {
        let config: StorageConfig = toml::from_str(
            r#"
            type = "s3"
            bucket = "archive"
        "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("region"), "{err}");
    }

    #[test]
    fn test_s3_part_size_floor() {
        let config: StorageConfig = toml::from_str(
            r#"
            type = "s3"
            bucket = "archive"
            endpoint = "http://localhost:9000"
            part_size_mb = 1
        "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_debug_redacts_credentials() {
        let config: StorageConfig = toml::from_str(
            r#"
            type = "s3"
            bucket = "archive"
            region = "eu-west-1"
            access_key_id = "AKIAEXAMPLE"
            secret_access_key = "supersecret"
        "#,
        )
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("supersecret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_filesystem_defaults() {
        let config: StorageConfig = toml::from_str(
            r#"
            type = "filesystem"
            path = "/srv/archive"
        "#,
        )
        .unwrap();

        match config {
            StorageConfig::Filesystem(c) => {
                assert!(c.create_dir);
                assert_eq!(c.file_mode, 0o640);
                assert_eq!(c.dir_mode, 0o750);
            }
            other => panic!("expected filesystem config, got {other:?}"),
        }
    }
}
