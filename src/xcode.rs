//! Xcode project metadata lookups and version stamping.
//!
//! The project is never parsed directly; everything goes through Apple's
//! own tools (`xcodebuild -showBuildSettings`, `agvtool`) so the answers
//! match what the archive step will actually use.

use crate::error::{Error, Result};
use crate::exec::{execute, execute_in};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The Xcode container a command operates on.
#[derive(Debug, Clone)]
pub enum ProjectRef {
    Project(PathBuf),
    Workspace(PathBuf),
}

impl ProjectRef {
    /// Build from the mutually optional CLI flags; at least one is required.
    pub fn from_options(project: Option<PathBuf>, workspace: Option<PathBuf>) -> Result<Self> {
        match (workspace, project) {
            (Some(workspace), _) => Ok(ProjectRef::Workspace(workspace)),
            (None, Some(project)) => Ok(ProjectRef::Project(project)),
            (None, None) => Err(Error::MissingArgument {
                argument: "--project-path or --workspace-path".to_string(),
            }),
        }
    }

    /// `-project <path>` or `-workspace <path>` for xcodebuild.
    pub fn container_args(&self) -> Result<[&str; 2]> {
        let (flag, path) = match self {
            ProjectRef::Project(path) => ("-project", path),
            ProjectRef::Workspace(path) => ("-workspace", path),
        };
        let path = path
            .to_str()
            .ok_or_else(|| Error::validation("project path is not valid UTF-8"))?;
        Ok([flag, path])
    }

    /// Directory containing the project or workspace file.
    pub fn directory(&self) -> &Path {
        let path = match self {
            ProjectRef::Project(path) => path,
            ProjectRef::Workspace(path) => path,
        };
        path.parent().unwrap_or(Path::new("."))
    }
}

/// Resolved build settings for one scheme/configuration.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    values: HashMap<String, String>,
}

impl BuildSettings {
    /// Run `xcodebuild -showBuildSettings` and parse the `KEY = VALUE` lines.
    pub async fn fetch(
        project: &ProjectRef,
        scheme: &str,
        configuration: &str,
    ) -> Result<Self> {
        let container = project.container_args()?;
        let output = execute(
            "xcodebuild",
            &[
                "-showBuildSettings",
                "-scheme",
                scheme,
                "-configuration",
                configuration,
                container[0],
                container[1],
            ],
            false,
        )
        .await?;

        Ok(Self {
            values: parse_build_settings(&output),
        })
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::validation(format!("build setting {key} not found")))
    }

    /// Product display name (PRODUCT_NAME, already resolved by xcodebuild).
    pub fn app_display_name(&self) -> Result<&str> {
        self.required("PRODUCT_NAME")
    }

    /// Minimum supported macOS version (MACOSX_DEPLOYMENT_TARGET).
    pub fn minimum_macos_version(&self) -> Result<&str> {
        self.required("MACOSX_DEPLOYMENT_TARGET")
    }

    /// Absolute path of the target's Info.plist, when the target has one.
    pub fn info_plist_path(&self) -> Option<PathBuf> {
        let file = self.values.get("INFOPLIST_FILE")?;
        if file.is_empty() {
            return None;
        }
        let file = PathBuf::from(file);
        if file.is_absolute() {
            return Some(file);
        }
        self.values
            .get("SRCROOT")
            .map(|root| Path::new(root).join(file))
    }
}

fn parse_build_settings(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(" = ")?;
            let key = key.trim();
            // Settings lines are indented key = value; skip section headers.
            if key.is_empty() || key.contains(char::is_whitespace) {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Verify the target's Info.plist carries the update-checker configuration
/// (`SUFeedURL` and `SUPublicEDKey`). Apps missing either would build and
/// notarize fine but never see the published feed.
pub fn check_sparkle_configuration(settings: &BuildSettings) -> Result<()> {
    let plist_path = settings
        .info_plist_path()
        .ok_or_else(|| Error::validation("Info.plist not found in the project"))?;

    let info = plist::Value::from_file(&plist_path)?;
    let dict = info
        .as_dictionary()
        .ok_or_else(|| Error::validation("Info.plist is not a dictionary"))?;

    for key in ["SUFeedURL", "SUPublicEDKey"] {
        if dict.get(key).is_none() {
            return Err(Error::validation(format!(
                "Info.plist does not contain the needed Sparkle configuration: {key}"
            )));
        }
    }

    Ok(())
}

/// Stamp the computed versions into the project via agvtool so the built
/// binary carries the same pair that the feed entry will advertise.
pub async fn update_project_version(
    project: &ProjectRef,
    marketing_version: &str,
    build_number: u64,
) -> Result<()> {
    let dir = project.directory();

    execute_in(
        dir,
        "xcrun",
        &["agvtool", "new-marketing-version", marketing_version],
        false,
    )
    .await?;
    execute_in(
        dir,
        "xcrun",
        &["agvtool", "new-version", "-all", &build_number.to_string()],
        false,
    )
    .await?;

    log::debug!("Updated the project version to {marketing_version} ({build_number})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_show_build_settings_output() {
        let output = concat!(
            "Build settings for action build and target MyApp:\n",
            "    PRODUCT_NAME = MyApp\n",
            "    MACOSX_DEPLOYMENT_TARGET = 14.0\n",
            "    INFOPLIST_FILE = MyApp/Info.plist\n",
            "    SRCROOT = /Users/ci/checkout\n",
        );
        let settings = BuildSettings {
            values: parse_build_settings(output),
        };
        assert_eq!(settings.app_display_name().unwrap(), "MyApp");
        assert_eq!(settings.minimum_macos_version().unwrap(), "14.0");
        assert_eq!(
            settings.info_plist_path().unwrap(),
            PathBuf::from("/Users/ci/checkout/MyApp/Info.plist")
        );
    }

    #[test]
    fn missing_setting_is_named_in_the_error() {
        let settings = BuildSettings {
            values: HashMap::new(),
        };
        let err = settings.app_display_name().unwrap_err();
        assert!(err.to_string().contains("PRODUCT_NAME"));
    }

    #[test]
    fn workspace_takes_precedence_over_project() {
        let r = ProjectRef::from_options(
            Some(PathBuf::from("App.xcodeproj")),
            Some(PathBuf::from("App.xcworkspace")),
        )
        .unwrap();
        assert!(matches!(r, ProjectRef::Workspace(_)));
    }

    #[test]
    fn neither_container_is_an_error() {
        let err = ProjectRef::from_options(None, None).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { .. }));
    }
}
