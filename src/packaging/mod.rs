//! Archive, export, signing, and notarization orchestration.
//!
//! A linear sequence of external-tool invocations with the run's
//! [`SigningIdentity`] injected where the tools need it. Failures propagate
//! unchanged; apart from the DMG unmount retry (owned by the `dmg` module)
//! nothing here retries.

use crate::config::{DmgLayoutConfig, ProjectConfig};
use crate::dmg;
use crate::error::{Error, Result};
use crate::exec::execute;
use crate::keychain::{NOTARIZE_KEYCHAIN_PROFILE, SigningIdentity};
use crate::workdir::WorkDir;
use crate::xcode::ProjectRef;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Per-app sub-paths of the embedded Sparkle framework that must be signed
/// individually, innermost first. Signing a container after its signed
/// contents must not invalidate their signatures, so the order here is
/// load-bearing.
const SPARKLE_FRAMEWORK_SUBPATHS: [(&str, &str); 4] = [
    ("Sparkle AutoUpdate", "AutoUpdate"),
    ("Sparkle Updater", "Updater.app"),
    (
        "Sparkle Installer XPC Service",
        "XPCServices/Installer.xpc/Contents/MacOS/Installer",
    ),
    (
        "Sparkle Downloader XPC Service",
        "XPCServices/Downloader.xpc/Contents/MacOS/Downloader",
    ),
];

/// xcodebuild -exportArchive configuration descriptor.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportOptions<'a> {
    signing_style: &'a str,
    method: &'a str,
    #[serde(rename = "teamID")]
    team_id: &'a str,
    signing_certificate: &'a str,
    destination: &'a str,
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::validation("path contains non-UTF8 characters"))
}

/// Inputs for one archive/export run.
pub struct ArchiveRequest<'a> {
    pub identity: &'a SigningIdentity,
    pub project: &'a ProjectRef,
    pub project_config: &'a ProjectConfig,
    pub app_display_name: &'a str,
    /// Copy the exported .app here when given
    pub output_dir: Option<&'a Path>,
    /// Skip signing the embedded Sparkle framework
    pub skip_sparkle_steps: bool,
}

/// Archive the scheme, export the signed .app, and (unless skipped) re-sign
/// the embedded Sparkle framework. Returns the exported .app path.
pub async fn archive_and_sign(request: &ArchiveRequest<'_>, workdir: &WorkDir) -> Result<PathBuf> {
    log::info!("Archiving and signing the app...");
    let archive_path = archive(request, workdir).await?;

    log::info!("Exporting the app...");
    let exported_app = export_app(request, &archive_path, workdir).await?;

    if !request.skip_sparkle_steps {
        log::info!("Signing the Sparkle framework...");
        sign_sparkle_framework(&exported_app, &request.identity.certificate_name).await?;
    }

    Ok(exported_app)
}

async fn archive(request: &ArchiveRequest<'_>, workdir: &WorkDir) -> Result<PathBuf> {
    let archive_path = workdir.file_path(&format!("{}.xcarchive", request.app_display_name));
    let container = request.project.container_args()?;

    execute(
        "xcodebuild",
        &[
            "clean",
            "analyze",
            "archive",
            "-scheme",
            &request.project_config.scheme,
            "-archivePath",
            path_str(&archive_path)?,
            "-configuration",
            &request.project_config.configuration,
            container[0],
            container[1],
            &format!(
                "CODE_SIGN_IDENTITY={}",
                request.identity.certificate_name
            ),
            &format!("DEVELOPMENT_TEAM={}", request.identity.team_id),
            "OTHER_CODE_SIGN_FLAGS=--timestamp --options=runtime",
        ],
        false,
    )
    .await?;

    Ok(archive_path)
}

async fn export_app(
    request: &ArchiveRequest<'_>,
    archive_path: &Path,
    workdir: &WorkDir,
) -> Result<PathBuf> {
    let options = ExportOptions {
        signing_style: "automatic",
        method: "developer-id",
        team_id: &request.identity.team_id,
        signing_certificate: &request.identity.certificate_name,
        destination: "export",
    };

    let options_path = workdir.file_path("exportOptions.plist");
    plist::to_file_xml(&options_path, &options)?;
    log::debug!("Wrote exportOptions.plist to {}", options_path.display());

    let export_dir = workdir.subdirectory("exported_app").await?;

    execute(
        "xcodebuild",
        &[
            "-exportArchive",
            "-archivePath",
            path_str(archive_path)?,
            "-exportPath",
            path_str(&export_dir)?,
            "-exportOptionsPlist",
            path_str(&options_path)?,
        ],
        false,
    )
    .await?;

    let exported_app = export_dir.join(format!("{}.app", request.app_display_name));

    match request.output_dir {
        None => Ok(exported_app),
        Some(output_dir) => {
            execute(
                "cp",
                &["-R", path_str(&exported_app)?, path_str(output_dir)?],
                false,
            )
            .await?;
            Ok(output_dir.join(format!("{}.app", request.app_display_name)))
        }
    }
}

/// Sign the embedded Sparkle framework pieces, innermost first, then the
/// framework directory itself.
async fn sign_sparkle_framework(exported_app: &Path, certificate_name: &str) -> Result<()> {
    let framework = exported_app.join("Contents/Frameworks/Sparkle.framework");

    for (description, subpath) in SPARKLE_FRAMEWORK_SUBPATHS {
        codesign(description, certificate_name, &framework.join(subpath)).await?;
    }
    codesign("Sparkle framework", certificate_name, &framework).await?;

    Ok(())
}

async fn codesign(description: &str, certificate_name: &str, target: &Path) -> Result<()> {
    log::debug!("Signing {description}...");
    execute(
        "codesign",
        &[
            "-f",
            "-o",
            "runtime",
            "--timestamp",
            "-s",
            certificate_name,
            path_str(target)?,
        ],
        false,
    )
    .await?;
    Ok(())
}

/// Build the DMG, sign it, submit for notarization (blocking on the
/// verdict), staple the ticket, and optionally copy to `output_dir`.
pub async fn create_and_sign_dmg(
    app_path: &Path,
    app_display_name: &str,
    identity: &SigningIdentity,
    layout: &DmgLayoutConfig,
    env_file_dir: &Path,
    workdir: &WorkDir,
    output_dir: Option<&Path>,
) -> Result<PathBuf> {
    log::info!("Creating {app_display_name}.dmg...");
    let dmg_path = dmg::create(app_path, app_display_name, layout, env_file_dir, workdir).await?;

    log::info!("Signing the DMG...");
    execute(
        "codesign",
        &[
            "--force",
            "--sign",
            &identity.certificate_name,
            "--timestamp",
            "--options",
            "runtime",
            path_str(&dmg_path)?,
        ],
        false,
    )
    .await?;

    notarize_and_staple(&dmg_path, identity).await?;

    match output_dir {
        None => Ok(dmg_path),
        Some(output_dir) => {
            let destination = output_dir.join(format!("{app_display_name}.dmg"));
            tokio::fs::copy(&dmg_path, &destination).await?;
            Ok(destination)
        }
    }
}

/// Submit the image under the run keychain's notarization profile, wait for
/// the verdict, and staple it.
async fn notarize_and_staple(dmg_path: &Path, identity: &SigningIdentity) -> Result<()> {
    log::info!("Notarizing the DMG...");

    execute(
        "xcrun",
        &[
            "notarytool",
            "submit",
            path_str(dmg_path)?,
            "--keychain-profile",
            NOTARIZE_KEYCHAIN_PROFILE,
            "--keychain",
            path_str(&identity.keychain_path)?,
            "--wait",
        ],
        false,
    )
    .await?;

    log::info!("Stapling the notarization ticket...");
    execute("xcrun", &["stapler", "staple", path_str(dmg_path)?], false).await?;
    log::info!("✓ DMG notarized and stapled");

    Ok(())
}
