//! Update signing, feed merging, and publication.

use crate::appcast::version::VersionDecision;
use crate::appcast::{self, FeedEntry};
use crate::config;
use crate::error::Result;
use crate::exec::execute_with_stdin;
use crate::storage::{self, Storage};
use crate::workdir::WorkDir;
use std::path::Path;

/// Descriptive fields of the release being published.
pub struct ReleaseMeta<'a> {
    pub app_display_name: &'a str,
    pub title: &'a str,
    pub website_url: &'a str,
    pub release_notes: &'a str,
    pub minimum_macos_version: &'a str,
}

/// Produce the detached EdDSA signature fragment for the artifact.
///
/// The private key goes to Sparkle's `sign_update` on stdin
/// (`--ed-key-file -`) so it never appears in an argv or a log line.
pub async fn sign_update(dmg_path: &Path, private_key: &str) -> Result<String> {
    log::debug!("Signing the update...");

    let tool = config::optional("SPARKLE_SIGN_UPDATE_PATH")
        .unwrap_or_else(|| "sign_update".to_string());
    let dmg = dmg_path
        .to_str()
        .ok_or_else(|| crate::error::Error::validation("dmg path is not valid UTF-8"))?;

    let fragment =
        execute_with_stdin(&tool, &[dmg, "--ed-key-file", "-"], Some(private_key), true).await?;

    Ok(fragment.trim().to_string())
}

/// Render the new feed entry, merge it into the deployed appcast, and
/// publish artifact then feed.
///
/// The artifact uploads first: if the feed upload then fails, the remote
/// feed is stale but still consistent. No compensating delete is attempted
/// and a retry of a completed merge would duplicate the entry, so a failed
/// run must be re-driven from `distribute`, not resumed.
pub async fn upload_update<S: Storage>(
    storage: &S,
    workdir: &WorkDir,
    dmg_path: &Path,
    deployed_appcast: Option<&str>,
    decision: &VersionDecision,
    signature_fragment: &str,
    meta: &ReleaseMeta<'_>,
) -> Result<()> {
    log::info!("Uploading the update to the server...");

    let key = storage::artifact_key(&decision.marketing.to_string(), meta.app_display_name);

    let entry = FeedEntry::new(
        decision,
        meta.title,
        meta.website_url,
        meta.release_notes,
        &key,
        signature_fragment,
        meta.minimum_macos_version,
    )?;

    let merged = appcast::merge(deployed_appcast, &entry)?;
    let appcast_path = workdir.write_file("appcast.xml", merged.as_bytes()).await?;

    storage.upload_artifact(dmg_path, &key).await?;
    storage.upload_appcast(&appcast_path).await?;

    log::info!(
        "{} version {} has been uploaded successfully. ✅ 🚀",
        meta.app_display_name,
        decision
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appcast::version::{BumpPolicy, VersionOverrides};
    use crate::error::Error;
    use semver::Version;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const SIGNATURE: &str = r#"sparkle:edSignature="c2ln" length="12345""#;

    /// Records uploads in order; optionally fails the feed upload.
    #[derive(Default)]
    struct RecordingStorage {
        deployed: Option<String>,
        fail_feed_upload: bool,
        operations: Mutex<Vec<String>>,
    }

    impl Storage for RecordingStorage {
        async fn deployed_appcast(&self) -> Result<Option<String>> {
            Ok(self.deployed.clone())
        }

        async fn upload_artifact(&self, _local_path: &Path, key: &str) -> Result<()> {
            self.operations
                .lock()
                .unwrap()
                .push(format!("artifact:{key}"));
            Ok(())
        }

        async fn upload_appcast(&self, local_path: &Path) -> Result<()> {
            if self.fail_feed_upload {
                return Err(Error::Upload {
                    key: storage::APPCAST_KEY.to_string(),
                    source: anyhow::anyhow!("simulated outage"),
                });
            }
            let xml = std::fs::read_to_string(local_path).unwrap();
            self.operations
                .lock()
                .unwrap()
                .push(format!("appcast:{}", xml.matches("<item>").count()));
            Ok(())
        }
    }

    fn meta() -> ReleaseMeta<'static> {
        ReleaseMeta {
            app_display_name: "MyApp",
            title: "A fresh update",
            website_url: "https://example.com",
            release_notes: "Fixed everything",
            minimum_macos_version: "14.0",
        }
    }

    async fn workdir() -> (tempfile::TempDir, WorkDir) {
        let dir = tempfile::tempdir().unwrap();
        let workdir = WorkDir::create(dir.path().join("build")).await.unwrap();
        (dir, workdir)
    }

    #[tokio::test]
    async fn publishes_bootstrap_release_artifact_before_feed() {
        let (_guard, workdir) = workdir().await;
        let storage = RecordingStorage::default();

        let deployed = storage.deployed_appcast().await.unwrap();
        let decision = appcast::compute_next(
            deployed.as_deref(),
            BumpPolicy::Patch,
            &VersionOverrides::default(),
        )
        .unwrap();

        upload_update(
            &storage,
            &workdir,
            &PathBuf::from("/tmp/MyApp.dmg"),
            deployed.as_deref(),
            &decision,
            SIGNATURE,
            &meta(),
        )
        .await
        .unwrap();

        let operations = storage.operations.lock().unwrap().clone();
        assert_eq!(operations, vec!["artifact:1.0.0/MyApp.dmg", "appcast:1"]);
    }

    #[tokio::test]
    async fn second_release_bumps_patch_and_appends_entry() {
        let (_guard, workdir) = workdir().await;

        // Deployed feed with one entry: 1.0.0 / build 4.
        let first_entry = FeedEntry::new(
            &VersionDecision {
                marketing: Version::parse("1.0.0").unwrap(),
                build: 4,
            },
            "First",
            "https://example.com",
            "Initial release",
            "1.0.0/MyApp.dmg",
            SIGNATURE,
            "14.0",
        )
        .unwrap();
        let deployed = appcast::merge(None, &first_entry).unwrap();

        let storage = RecordingStorage {
            deployed: Some(deployed),
            ..Default::default()
        };

        let deployed = storage.deployed_appcast().await.unwrap();
        let decision = appcast::compute_next(
            deployed.as_deref(),
            BumpPolicy::Patch,
            &VersionOverrides::default(),
        )
        .unwrap();
        assert_eq!(decision.marketing.to_string(), "1.0.1");
        assert_eq!(decision.build, 5);

        upload_update(
            &storage,
            &workdir,
            &PathBuf::from("/tmp/MyApp.dmg"),
            deployed.as_deref(),
            &decision,
            SIGNATURE,
            &meta(),
        )
        .await
        .unwrap();

        let operations = storage.operations.lock().unwrap().clone();
        assert_eq!(operations, vec!["artifact:1.0.1/MyApp.dmg", "appcast:2"]);

        // The generated document on disk carries both entries.
        let xml = std::fs::read_to_string(workdir.file_path("appcast.xml")).unwrap();
        let published = appcast::scan_versions(&xml).unwrap();
        assert_eq!(published.builds, vec![4, 5]);
    }

    #[tokio::test]
    async fn feed_upload_failure_propagates_after_artifact_upload() {
        let (_guard, workdir) = workdir().await;
        let storage = RecordingStorage {
            fail_feed_upload: true,
            ..Default::default()
        };

        let decision = VersionDecision {
            marketing: Version::parse("1.0.0").unwrap(),
            build: 1,
        };

        let err = upload_update(
            &storage,
            &workdir,
            &PathBuf::from("/tmp/MyApp.dmg"),
            None,
            &decision,
            SIGNATURE,
            &meta(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Upload { .. }));
        // The artifact went out before the failure; remote feed is stale.
        let operations = storage.operations.lock().unwrap().clone();
        assert_eq!(operations, vec!["artifact:1.0.0/MyApp.dmg"]);
    }
}
