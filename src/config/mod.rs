//! Per-environment configuration.
//!
//! Secrets and descriptive fields come from a key-value environment file
//! (`.env.sparklecast.<name>` next to the project, or an explicit path given
//! to `--env`). The file is loaded into the process environment once and
//! read back through typed accessors that fail fast with the missing key's
//! name.

use crate::appcast::version::BumpPolicy;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Fixed file-name prefix for named environments.
const ENV_FILE_PREFIX: &str = ".env.sparklecast";

/// Resolve and load the environment file for `env_arg`.
///
/// `env_arg` is either a direct path to an env file or an environment name;
/// a name resolves to `.env.sparklecast.<name>` inside `base_dir` (the
/// project directory when one is known, otherwise the working directory).
pub fn load_environment(env_arg: &str, base_dir: &Path) -> Result<PathBuf> {
    let direct = PathBuf::from(env_arg);
    let env_file = if direct.is_file() {
        direct
    } else {
        base_dir.join(format!("{ENV_FILE_PREFIX}.{env_arg}"))
    };

    if !env_file.is_file() {
        return Err(Error::validation(format!(
            "{} does not exist",
            env_file.display()
        )));
    }

    dotenvy::from_path(&env_file)
        .map_err(|e| Error::validation(format!("could not load {}: {e}", env_file.display())))?;

    log::debug!("Loaded environment from {}", env_file.display());
    Ok(env_file)
}

/// Fetch a required key from the loaded environment.
///
/// Empty values count as missing so a blank line in the env file cannot
/// smuggle an empty secret into a tool invocation.
pub fn required(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingVariable {
            key: key.to_string(),
        }),
    }
}

/// Fetch an optional key; absent and empty both yield `None`.
pub fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Xcode project build inputs.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Scheme to archive
    pub scheme: String,
    /// Build configuration (e.g. `Release`)
    pub configuration: String,
}

impl ProjectConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            scheme: required("SCHEME")?,
            configuration: required("CONFIGURATION")?,
        })
    }
}

/// Everything the credential vault needs to set up one signing run.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Base64-encoded Developer ID Application .p12
    pub certificate_base64: String,
    /// Password protecting the .p12
    pub certificate_password: String,
    /// Apple ID used for notarization
    pub apple_id: String,
    /// App-specific password for the Apple ID
    pub app_specific_password: String,
}

impl SigningConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            certificate_base64: required("DEVELOPER_ID_APPLICATION_BASE64")?,
            certificate_password: required("DEVELOPER_ID_APPLICATION_PASSWORD")?,
            apple_id: required("APPLE_ID")?,
            app_specific_password: required("APP_SPECIFIC_PASSWORD")?,
        })
    }
}

/// Update-feed inputs for the distribute stage.
#[derive(Debug, Clone)]
pub struct SparkleConfig {
    /// EdDSA private key fed to `sign_update` on stdin
    pub private_key: String,
    /// Title of the new feed entry
    pub update_title: String,
    /// Release notes embedded verbatim in the entry's CDATA block
    pub release_notes: String,
    /// Marketing-version bump rule
    pub bump_policy: BumpPolicy,
    /// `<link>` target of the new entry
    pub website_url: String,
}

impl SparkleConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            private_key: required("SPARKLE_PRIVATE_KEY")?,
            update_title: required("SPARKLE_UPDATE_TITLE")?,
            release_notes: required("SPARKLE_RELEASE_NOTES")?,
            bump_policy: required("SPARKLE_BUMP_VERSION_METHOD")?.parse()?,
            website_url: required("WEBSITE_URL")?,
        })
    }
}

/// DMG window geometry and artwork.
#[derive(Debug, Clone)]
pub struct DmgLayoutConfig {
    /// Background image path; relative paths resolve against the env file
    pub background_image: Option<String>,
    /// Finder icon size inside the volume window
    pub icon_size: u32,
    /// Volume window width in points
    pub window_width: u32,
    /// Volume window height in points
    pub window_height: u32,
}

impl DmgLayoutConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            background_image: optional("DMG_BACKGROUND_IMAGE"),
            icon_size: parse_dimension("DMG_ICON_SIZE")?,
            window_width: parse_dimension("DMG_WINDOW_WIDTH")?,
            window_height: parse_dimension("DMG_WINDOW_HEIGHT")?,
        })
    }
}

fn parse_dimension(key: &str) -> Result<u32> {
    required(key)?
        .parse::<u32>()
        .map_err(|_| Error::validation(format!("{key} must be a positive integer")))
}

/// Credentials and location of the S3 bucket holding releases.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket_name: String,
    /// Custom endpoint for S3-compatible stores (R2, MinIO); None = AWS
    pub endpoint: Option<String>,
}

impl S3Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key: required("AWS_S3_ACCESS_KEY")?,
            secret_access_key: required("AWS_S3_SECRET_ACCESS_KEY")?,
            region: required("AWS_S3_REGION")?,
            bucket_name: required("AWS_S3_BUCKET_NAME")?,
            endpoint: optional("AWS_S3_ENDPOINT"),
        })
    }
}

/// Which storage backend the environment selects.
///
/// Only `aws-s3` exists today; the name check stays so a typo fails before
/// anything is built or uploaded.
pub fn storage_type() -> Result<String> {
    let storage = required("STORAGE_TYPE")?;
    if storage != "aws-s3" {
        return Err(Error::validation(format!(
            "Storage type {storage} is not supported"
        )));
    }
    Ok(storage)
}
