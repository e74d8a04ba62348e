//! Disk image creation and visual customization.
//!
//! Builds the distributable DMG the way Finder users expect: a sized blank
//! read-write image, the .app copied in next to an Applications symlink, a
//! background picture and icon layout applied through Finder scripting, and
//! a final conversion to compressed read-only UDZO.
//!
//! # Module layout
//! - `creation` - blank image sizing/creation, mounting, copying, conversion
//! - `customization` - Finder window appearance via AppleScript

mod creation;
mod customization;

pub use creation::unmount;

use crate::config::DmgLayoutConfig;
use crate::error::Result;
use crate::workdir::WorkDir;
use std::path::{Path, PathBuf};

/// Create the final compressed DMG for `app_path` under the build directory.
///
/// # Process
/// 1. Compute the volume size (app + background image + fixed buffer)
/// 2. Create a blank HFS+ read-write image with a unique intermediate name
/// 3. Mount it and copy in the .app plus an Applications symlink
/// 4. Copy the background image and apply the Finder window layout
/// 5. Unmount (one retry after a fixed delay) and convert to UDZO
///
/// Returns the path of the read-only DMG named `{display name}.dmg`.
pub async fn create(
    app_path: &Path,
    app_display_name: &str,
    layout: &DmgLayoutConfig,
    env_file_dir: &Path,
    workdir: &WorkDir,
) -> Result<PathBuf> {
    let volume_name = app_display_name;
    let background = customization::resolve_background_image(layout, env_file_dir)?;

    let size_mb = creation::calculate_volume_size_mb(app_path, background.as_deref()).await?;
    let rw_dmg = creation::create_blank_dmg(workdir, app_display_name, volume_name, size_mb).await?;

    creation::mount(&rw_dmg, volume_name).await?;

    // From here the volume is mounted; unmount before returning any error so
    // a failed customization does not leave the image attached.
    let populate = async {
        creation::copy_app_and_link_applications(app_path, volume_name).await?;
        let background_file = match &background {
            Some(background) => {
                Some(customization::copy_background_image(background, volume_name).await?)
            }
            None => None,
        };
        customization::apply_finder_layout(
            volume_name,
            app_display_name,
            layout,
            background_file.as_deref(),
        )
        .await
    };

    let populated = populate.await;
    let unmounted = creation::unmount(volume_name).await;
    populated?;
    unmounted?;

    creation::convert_to_read_only(&rw_dmg, app_display_name, workdir).await
}
