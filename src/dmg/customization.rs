//! DMG appearance customization via Finder scripting.

use crate::config::DmgLayoutConfig;
use crate::error::{Error, Result};
use crate::exec::execute;
use std::path::{Path, PathBuf};

/// Resolve the configured background image to an absolute path.
///
/// `~`-prefixed paths expand against the home directory, absolute paths are
/// used as-is, and relative paths resolve against the directory holding the
/// environment file. A configured image that does not exist is fatal; no
/// image configured means a plain volume window.
pub fn resolve_background_image(
    layout: &DmgLayoutConfig,
    env_file_dir: &Path,
) -> Result<Option<PathBuf>> {
    let Some(configured) = &layout.background_image else {
        return Ok(None);
    };

    let path = if let Some(rest) = configured.strip_prefix("~/") {
        dirs::home_dir()
            .ok_or_else(|| Error::validation("could not determine the home directory"))?
            .join(rest)
    } else if Path::new(configured).is_absolute() {
        PathBuf::from(configured)
    } else {
        env_file_dir.join(configured)
    };

    if !path.is_file() {
        return Err(Error::validation(format!(
            "DMG background image not found at {}",
            path.display()
        )));
    }

    Ok(Some(path))
}

/// Copy the background image to the volume's hidden `.background` folder.
///
/// Returns the file name written there so the Finder script references the
/// same name regardless of the image's extension.
pub async fn copy_background_image(background: &Path, volume_name: &str) -> Result<String> {
    log::debug!("Copying the background image to the DMG...");

    let background_dir = PathBuf::from(format!("/Volumes/{volume_name}/.background"));
    tokio::fs::create_dir_all(&background_dir).await?;

    let extension = background
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    let file_name = format!("dmg-background.{extension}");
    tokio::fs::copy(background, background_dir.join(&file_name)).await?;

    Ok(file_name)
}

/// Apply the Finder window layout so the saved .DS_Store persists it:
/// icon view, fixed bounds, the app at 25% width and the Applications link
/// at 75%, both vertically centered.
pub async fn apply_finder_layout(
    volume_name: &str,
    app_display_name: &str,
    layout: &DmgLayoutConfig,
    background_file: Option<&str>,
) -> Result<()> {
    log::debug!("Customizing the appearance of the DMG...");

    let script = finder_layout_script(volume_name, app_display_name, layout, background_file);
    execute("osascript", &["-e", &script], false).await?;

    Ok(())
}

/// Escape backslashes and quotes for an AppleScript string literal.
fn escape_applescript_string(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', r#"\""#)
}

fn finder_layout_script(
    volume_name: &str,
    app_display_name: &str,
    layout: &DmgLayoutConfig,
    background_file: Option<&str>,
) -> String {
    let volume = escape_applescript_string(volume_name);
    let app_item = escape_applescript_string(&format!("{app_display_name}.app"));

    let width = layout.window_width;
    let height = layout.window_height;
    let app_x = width / 4;
    let applications_x = width * 3 / 4;
    let item_y = height / 2;

    let background_line = match background_file {
        Some(name) => format!(
            "\n        set background picture of icon view options of container window to file \".background:{}\"",
            escape_applescript_string(name)
        ),
        None => String::new(),
    };

    format!(
        r#"tell application "Finder"
    tell disk "{volume}"
        open
        set current view of container window to icon view
        set toolbar visible of container window to false
        set statusbar visible of container window to false
        set the bounds of container window to {{0, 0, {width}, {height}}}
        set arrangement of icon view options of container window to not arranged
        set icon size of icon view options of container window to {icon_size}{background_line}
        set position of item "{app_item}" of container window to {{{app_x}, {item_y}}}
        set position of item "Applications" of container window to {{{applications_x}, {item_y}}}
        close
        open
        update without registering applications
        delay 5
    end tell
end tell"#,
        icon_size = layout.icon_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(background: Option<&str>) -> DmgLayoutConfig {
        DmgLayoutConfig {
            background_image: background.map(String::from),
            icon_size: 128,
            window_width: 600,
            window_height: 400,
        }
    }

    #[test]
    fn item_positions_follow_window_geometry() {
        let script = finder_layout_script(
            "MyApp",
            "MyApp",
            &layout(Some("bg.png")),
            Some("dmg-background.png"),
        );
        assert!(script.contains("set the bounds of container window to {0, 0, 600, 400}"));
        assert!(script.contains(r#"set position of item "MyApp.app" of container window to {150, 200}"#));
        assert!(script.contains(r#"set position of item "Applications" of container window to {450, 200}"#));
        assert!(script.contains(".background:dmg-background.png"));
    }

    #[test]
    fn background_line_is_omitted_without_an_image() {
        let script = finder_layout_script("MyApp", "MyApp", &layout(None), None);
        assert!(!script.contains("background picture"));
    }

    #[test]
    fn quotes_in_display_names_are_escaped() {
        let script = finder_layout_script(r#"My"App"#, r#"My"App"#, &layout(None), None);
        assert!(script.contains(r#"tell disk "My\"App""#));
    }

    #[test]
    fn relative_background_resolves_against_env_file_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bg.png"), b"png").unwrap();

        let resolved = resolve_background_image(&layout(Some("bg.png")), dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(resolved, dir.path().join("bg.png"));
    }

    #[test]
    fn missing_configured_background_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_background_image(&layout(Some("missing.png")), dir.path()).unwrap_err();
        assert!(err.to_string().contains("background image not found"));
    }

    #[test]
    fn no_background_configured_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            resolve_background_image(&layout(None), dir.path())
                .unwrap()
                .is_none()
        );
    }
}
