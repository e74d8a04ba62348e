//! Ephemeral signing-credential lifecycle.
//!
//! Signing runs against an isolated, randomly named and randomly keyed
//! keychain created for one pipeline run. The system keychain search list
//! and default keychain are snapshotted before any mutation and restored
//! exactly on every exit path, so an aborted run never corrupts unrelated
//! use of the host machine.
//!
//! [`with_identity`] is the only entry point: it sets the keychain up,
//! yields a [`SigningIdentity`] to the caller's block, and guarantees
//! teardown whether setup, the block, or nothing at all failed.

use crate::config::SigningConfig;
use crate::error::{Error, Result};
use crate::exec::execute;
use crate::workdir::WorkDir;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::distr::{Alphanumeric, SampleString};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// Fixed notarytool profile name registered in the run's keychain.
pub const NOTARIZE_KEYCHAIN_PROFILE: &str = "sparklecast.keychain.notarize.profile";

/// Name prefix that marks a keychain as ours, so a store left behind by a
/// crashed run can be recognized and swept.
const KEYCHAIN_PREFIX: &str = "sparklecast-";
const KEYCHAIN_SUFFIX: &str = ".keychain-db";

/// Ephemeral certificate + team context for one run.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    /// Certificate display name, e.g. `Developer ID Application: Jane (TEAM1234)`
    pub certificate_name: String,
    /// Team identifier parsed from the certificate label
    pub team_id: String,
    /// The run keychain holding the certificate and notarization profile.
    /// Valid only inside the [`with_identity`] scope.
    pub keychain_path: PathBuf,
}

/// System credential-store configuration captured before any mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeychainSnapshot {
    search_list: Vec<String>,
    default_keychain: String,
}

impl KeychainSnapshot {
    /// Capture the current search list and default keychain.
    pub async fn capture() -> Result<Self> {
        let list_output = execute("security", &["list-keychains"], false).await?;
        let default_output = execute("security", &["default-keychain"], false).await?;

        let default_keychain = parse_keychain_lines(&default_output)
            .into_iter()
            .next()
            .ok_or_else(|| Error::validation("could not determine the default keychain"))?;

        Ok(Self {
            search_list: parse_keychain_lines(&list_output),
            default_keychain,
        })
    }

    /// Restore the search list and default keychain exactly as captured.
    pub async fn restore(&self) -> Result<()> {
        log::debug!("Restoring the original keychain configuration...");

        let mut args = vec!["list-keychains", "-s"];
        args.extend(self.search_list.iter().map(String::as_str));
        execute("security", &args, false).await?;

        execute(
            "security",
            &["default-keychain", "-s", &self.default_keychain],
            false,
        )
        .await?;

        Ok(())
    }
}

/// Parse `security list-keychains` / `security default-keychain` output:
/// one quoted, indented path per line.
fn parse_keychain_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_matches('"').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Extract the certificate label from `security find-certificate` output
/// (the `"labl"<blob>="…"` attribute line).
fn parse_certificate_label(output: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r#""labl"<blob>="([^"]+)""#).expect("valid regex"));
    pattern
        .captures(output)
        .map(|captures| captures[1].to_string())
}

/// Extract the trailing parenthesized team id from a certificate label.
///
/// A label that does not end in `(<team id>)` is an error rather than a
/// silent null: a missing team id would otherwise only surface much later
/// as an opaque xcodebuild signing failure.
fn parse_team_id(label: &str) -> Result<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\(([^)]+)\)$").expect("valid regex"));
    pattern
        .captures(label.trim())
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| Error::TeamIdUnresolved {
            label: label.to_string(),
        })
}

/// True when a file name looks like one of our run-scoped keychains.
fn is_run_keychain_name(name: &str) -> bool {
    name.starts_with(KEYCHAIN_PREFIX) && name.ends_with(KEYCHAIN_SUFFIX)
}

/// Default keychain directory (`~/Library/Keychains`).
fn default_keychains_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::validation("could not determine the home directory"))?;
    Ok(home.join("Library/Keychains"))
}

/// Execute `block` with a live signing identity.
///
/// Cleanup (keychain deletion plus search-list/default restoration) runs on
/// every exit path; a failure inside `block` or during setup never leaves
/// the run keychain installed. At most one identity is live per process by
/// construction: the pipeline driver holds a single scope at a time.
pub async fn with_identity<T, F, Fut>(
    config: &SigningConfig,
    workdir: &WorkDir,
    block: F,
) -> Result<T>
where
    F: FnOnce(SigningIdentity) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_identity_in(default_keychains_dir()?, config, workdir, block).await
}

/// [`with_identity`] with an explicit keychain directory.
pub async fn with_identity_in<T, F, Fut>(
    keychains_dir: PathBuf,
    config: &SigningConfig,
    workdir: &WorkDir,
    block: F,
) -> Result<T>
where
    F: FnOnce(SigningIdentity) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // Snapshot before any mutation; nothing to clean up if this fails.
    let snapshot = KeychainSnapshot::capture().await?;

    let vault = CredentialVault::generate(keychains_dir);

    let outcome = match vault.set_up(config, workdir, &snapshot).await {
        Ok(identity) => block(identity).await,
        Err(e) => Err(e),
    };

    log::debug!("Ensuring cleanup of temporary keychain...");
    let teardown = vault.tear_down(&snapshot).await;

    // The pipeline failure is the interesting one; a teardown failure only
    // surfaces when the run itself succeeded.
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown_error)) => Err(teardown_error),
        (Err(run_error), _) => Err(run_error),
    }
}

/// One run's isolated keychain: random name, random unlock password.
struct CredentialVault {
    keychains_dir: PathBuf,
    keychain_path: PathBuf,
    password: Zeroizing<String>,
}

impl CredentialVault {
    fn generate(keychains_dir: PathBuf) -> Self {
        let name = format!(
            "{KEYCHAIN_PREFIX}{}{KEYCHAIN_SUFFIX}",
            Alphanumeric.sample_string(&mut rand::rng(), 16)
        );
        let keychain_path = keychains_dir.join(name);
        let password = Zeroizing::new(Alphanumeric.sample_string(&mut rand::rng(), 32));

        Self {
            keychains_dir,
            keychain_path,
            password,
        }
    }

    fn path_str(&self) -> Result<&str> {
        self.keychain_path
            .to_str()
            .ok_or_else(|| Error::validation("keychain path is not valid UTF-8"))
    }

    /// Steps 2–7 of the credential lifecycle. Any failure here aborts before
    /// the caller's block runs, but teardown still executes.
    async fn set_up(
        &self,
        config: &SigningConfig,
        workdir: &WorkDir,
        snapshot: &KeychainSnapshot,
    ) -> Result<SigningIdentity> {
        self.sweep_stale_keychains().await?;
        self.create_keychain(snapshot).await?;
        self.import_certificate(config, workdir).await?;

        let identity = self.harvest_identity().await?;
        self.store_notarization_credentials(config, &identity.team_id)
            .await?;

        Ok(identity)
    }

    /// Remove keychains a crashed prior run left behind. Absence is the
    /// normal case, not an error.
    async fn sweep_stale_keychains(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.keychains_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_run_keychain_name(name) {
                continue;
            }

            let stale_path = entry.path();
            log::debug!("Deleting stale keychain {}", stale_path.display());

            let stale = stale_path
                .to_str()
                .ok_or_else(|| Error::validation("stale keychain path is not valid UTF-8"))?;
            if let Err(e) = execute("security", &["delete-keychain", stale], false).await {
                // delete-keychain refuses stores it no longer recognizes;
                // the file itself still has to go.
                log::warn!("security delete-keychain failed for stale store: {e}");
            }
            remove_if_present(&stale_path).await?;
        }

        Ok(())
    }

    async fn create_keychain(&self, snapshot: &KeychainSnapshot) -> Result<()> {
        let path = self.path_str()?;

        execute(
            "security",
            &["create-keychain", "-p", self.password.as_str(), path],
            true,
        )
        .await?;
        execute(
            "security",
            &["unlock-keychain", "-p", self.password.as_str(), path],
            true,
        )
        .await?;

        // Append to the user search list and make it the default for the
        // duration of the run.
        let mut args = vec!["list-keychains", "-d", "user", "-s"];
        args.extend(snapshot.search_list.iter().map(String::as_str));
        args.push(path);
        execute("security", &args, false).await?;

        execute("security", &["default-keychain", "-s", path], false).await?;

        Ok(())
    }

    /// Decode and import the Developer ID Application certificate, granting
    /// the signing and packaging tools non-interactive access to the key.
    async fn import_certificate(&self, config: &SigningConfig, workdir: &WorkDir) -> Result<()> {
        let path = self.path_str()?;

        let blob = BASE64
            .decode(config.certificate_base64.trim())
            .map_err(|e| Error::validation(format!("invalid certificate base64: {e}")))?;
        let cert_file = workdir.write_file("application_cert.p12", &blob).await?;
        let cert_path = cert_file
            .to_str()
            .ok_or_else(|| Error::validation("certificate path is not valid UTF-8"))?;

        execute(
            "security",
            &[
                "import",
                cert_path,
                "-k",
                path,
                "-P",
                &config.certificate_password,
                "-T",
                "/usr/bin/codesign",
                "-T",
                "/usr/bin/security",
                "-T",
                "/usr/bin/productbuild",
                "-T",
                "/usr/bin/productsign",
            ],
            true,
        )
        .await?;

        // Without this, codesign prompts for authorization and CI hangs.
        execute(
            "security",
            &[
                "set-key-partition-list",
                "-S",
                "apple-tool:,apple:,codesign:",
                "-s",
                "-k",
                self.password.as_str(),
                path,
            ],
            true,
        )
        .await?;

        Ok(())
    }

    /// Query the imported certificate's label and derive the team id.
    async fn harvest_identity(&self) -> Result<SigningIdentity> {
        let path = self.path_str()?;

        let output = execute(
            "security",
            &["find-certificate", "-c", "Developer ID Application", path],
            false,
        )
        .await?;

        let certificate_name = parse_certificate_label(&output).ok_or_else(|| {
            Error::validation("no Developer ID Application certificate label found in keychain")
        })?;
        let team_id = parse_team_id(&certificate_name)?;

        Ok(SigningIdentity {
            certificate_name,
            team_id,
            keychain_path: self.keychain_path.clone(),
        })
    }

    /// Register the notarization credentials under the fixed profile name.
    async fn store_notarization_credentials(
        &self,
        config: &SigningConfig,
        team_id: &str,
    ) -> Result<()> {
        let path = self.path_str()?;

        execute(
            "xcrun",
            &[
                "notarytool",
                "store-credentials",
                NOTARIZE_KEYCHAIN_PROFILE,
                "--keychain",
                path,
                "--apple-id",
                &config.apple_id,
                "--team-id",
                team_id,
                "--password",
                &config.app_specific_password,
            ],
            true,
        )
        .await?;

        Ok(())
    }

    /// Delete the run keychain (absent counts as deleted) and restore the
    /// snapshotted configuration. Safe to call however far setup got.
    async fn tear_down(&self, snapshot: &KeychainSnapshot) -> Result<()> {
        if self.keychain_path.exists() {
            let path = self.path_str()?;
            if let Err(e) = execute("security", &["delete-keychain", path], false).await {
                log::warn!("security delete-keychain failed during cleanup: {e}");
            }
            remove_if_present(&self.keychain_path).await?;
        }

        snapshot.restore().await
    }
}

/// Remove a file, treating "already absent" as success.
async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
