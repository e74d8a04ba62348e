//! Remote storage of release artifacts and the appcast feed.
//!
//! The pipeline depends only on the [`Storage`] trait; `distribute` fetches
//! the deployed appcast through it, then uploads the new artifact and the
//! merged feed. One concrete backend exists today ([`s3::S3Storage`]).

pub mod s3;

use crate::error::Result;
use std::path::Path;

/// Fixed remote key of the published appcast document.
pub const APPCAST_KEY: &str = "appcast.xml";

/// Capability set every storage backend implements.
///
/// Callers are generic over the backend; no boxing is needed, so plain
/// `async fn` methods are fine here.
#[allow(async_fn_in_trait)]
pub trait Storage {
    /// Fetch the currently deployed appcast document.
    ///
    /// A missing document is the valid "no prior publications" state and
    /// yields `Ok(None)`, not an error.
    async fn deployed_appcast(&self) -> Result<Option<String>>;

    /// Upload a release artifact under `key`.
    async fn upload_artifact(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Upload the merged appcast document under [`APPCAST_KEY`], replacing
    /// the deployed copy wholesale.
    async fn upload_appcast(&self, local_path: &Path) -> Result<()>;
}

/// Remote key an artifact is published under:
/// `{marketing version}/{display name}.dmg`.
pub fn artifact_key(marketing_version: &str, app_display_name: &str) -> String {
    format!("{marketing_version}/{app_display_name}.dmg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_key_layout() {
        assert_eq!(artifact_key("2.1.0", "MyApp"), "2.1.0/MyApp.dmg");
    }
}
