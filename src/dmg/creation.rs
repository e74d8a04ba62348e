//! Core DMG creation workflow using hdiutil.

use crate::error::{Error, Result};
use crate::exec::execute;
use crate::workdir::WorkDir;
use std::io;
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use uuid::Uuid;

/// Extra space reserved beyond the measured contents, in KiB.
const VOLUME_BUFFER_KB: u64 = 20 * 1024;

/// Delay before the single unmount retry.
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_secs(5);

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::validation("path contains non-UTF8 characters"))
}

/// Measure the .app with `du -sk` and size the volume to fit it, the
/// background image, and a fixed buffer. Returned in whole megabytes.
pub async fn calculate_volume_size_mb(
    app_path: &Path,
    background_image: Option<&Path>,
) -> Result<u64> {
    let output = execute("du", &["-sk", path_str(app_path)?], false).await?;
    let app_size_kb: u64 = output
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::validation(format!("unexpected du output: {output:?}")))?;

    let background_size_kb = match background_image {
        Some(path) => tokio::fs::metadata(path).await?.len() / 1024,
        None => 0,
    };

    let total_kb = app_size_kb + background_size_kb + VOLUME_BUFFER_KB;
    Ok(total_kb.div_ceil(1024))
}

/// Create a blank HFS+ read-write image sized `size_mb`, named with a
/// unique suffix so a re-run never collides with a leftover intermediate.
pub async fn create_blank_dmg(
    workdir: &WorkDir,
    app_display_name: &str,
    volume_name: &str,
    size_mb: u64,
) -> Result<PathBuf> {
    log::debug!("Creating a blank DMG...");

    let dmg_path = workdir.file_path(&format!("{app_display_name}-{}.dmg", Uuid::new_v4()));

    execute(
        "hdiutil",
        &[
            "create",
            "-size",
            &format!("{size_mb}m"),
            "-fs",
            "HFS+",
            "-volname",
            volume_name,
            "-ov",
            path_str(&dmg_path)?,
        ],
        false,
    )
    .await?;

    Ok(dmg_path)
}

fn mount_point(volume_name: &str) -> String {
    format!("/Volumes/{volume_name}")
}

/// Attach the image at `/Volumes/{volume name}`.
pub async fn mount(dmg_path: &Path, volume_name: &str) -> Result<()> {
    log::debug!("Mounting the DMG...");
    execute(
        "hdiutil",
        &[
            "attach",
            path_str(dmg_path)?,
            "-mountpoint",
            &mount_point(volume_name),
        ],
        false,
    )
    .await?;
    Ok(())
}

/// Copy the .app into the mounted volume and add the drag-to-install
/// Applications symlink.
pub async fn copy_app_and_link_applications(app_path: &Path, volume_name: &str) -> Result<()> {
    log::debug!("Copying the app to the DMG and linking the Applications folder...");

    let volume = mount_point(volume_name);

    // cp -R preserves the bundle's symlinks and metadata, which a naive
    // file-by-file copy would break along with the code signature.
    execute("cp", &["-R", path_str(app_path)?, &volume], false).await?;

    let link = PathBuf::from(&volume).join("Applications");
    #[cfg(unix)]
    match tokio::fs::symlink("/Applications", &link).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Detach the volume, retrying exactly once after a fixed delay.
///
/// Finder often still holds the volume right after scripting it; the first
/// failure is swallowed to allow the retry, the second propagates.
pub async fn unmount(volume_name: &str) -> Result<()> {
    log::debug!("Unmounting the DMG...");

    let volume = mount_point(volume_name);
    match execute("hdiutil", &["detach", &volume], false).await {
        Ok(_) => Ok(()),
        Err(_) => {
            log::debug!("Retrying unmount after a brief wait...");
            tokio::time::sleep(UNMOUNT_RETRY_DELAY).await;
            execute("hdiutil", &["detach", &volume], false).await?;
            Ok(())
        }
    }
}

/// Convert the read-write intermediate to compressed read-only UDZO and
/// remove the intermediate.
pub async fn convert_to_read_only(
    rw_dmg_path: &Path,
    app_display_name: &str,
    workdir: &WorkDir,
) -> Result<PathBuf> {
    log::debug!("Converting the DMG to read-only...");

    let final_path = workdir.file_path(&format!("{app_display_name}.dmg"));

    execute(
        "hdiutil",
        &[
            "convert",
            path_str(rw_dmg_path)?,
            "-format",
            "UDZO",
            "-o",
            path_str(&final_path)?,
        ],
        false,
    )
    .await?;

    tokio::fs::remove_file(rw_dmg_path).await?;

    Ok(final_path)
}
