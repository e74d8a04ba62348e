//! Command line argument parsing and validation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Release automation for Sparkle-updated macOS apps
#[derive(Parser, Debug)]
#[command(
    name = "sparklecast",
    version,
    about = "Release automation for Sparkle-updated macOS apps",
    long_about = "Archives, signs, notarizes, and publishes macOS apps that update \
themselves through Sparkle.

Secrets and release metadata come from a per-environment file \
(.env.sparklecast.<name>) next to the project, or from an explicit file path.

Usage:
  sparklecast export --env production --project-path MyApp.xcodeproj
  sparklecast package --env production --app-path ./MyApp.app
  sparklecast distribute --env production --dmg-path ./MyApp.dmg --app-display-name MyApp
  sparklecast automate --env production --workspace-path MyApp.xcworkspace"
)]
pub struct Args {
    /// Environment to load (e.g. local, production) or a path to the env file
    #[arg(long, global = true, value_name = "ENVIRONMENT")]
    pub env: Option<String>,

    /// Enable verbose mode
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Archive and export the macOS app
    Export {
        /// Path to the Xcode project
        #[arg(long, value_name = "PATH")]
        project_path: Option<PathBuf>,

        /// Path to the Xcode workspace
        #[arg(long, value_name = "PATH")]
        workspace_path: Option<PathBuf>,

        /// Skip the Sparkle config check and signing the framework
        #[arg(long)]
        skip_sparkle_steps: bool,

        /// Path to the output directory (defaults to the working directory)
        #[arg(long, value_name = "PATH")]
        output_dir: Option<PathBuf>,
    },

    /// Package the macOS app into a DMG file
    Package {
        /// Path to the exported app
        #[arg(long, value_name = "PATH")]
        app_path: PathBuf,

        /// Path to the output directory (defaults to the working directory)
        #[arg(long, value_name = "PATH")]
        output_dir: Option<PathBuf>,
    },

    /// Distribute a packaged DMG through the appcast feed
    Distribute {
        /// Path of the DMG file to be distributed
        #[arg(long, value_name = "PATH")]
        dmg_path: PathBuf,

        /// Name of the app inside the DMG without the .app extension
        #[arg(long, value_name = "NAME")]
        app_display_name: String,

        /// Marketing version of the app (skips derivation from the feed)
        #[arg(long, value_name = "VERSION")]
        marketing_version: Option<String>,

        /// Current project version of the app (skips derivation from the feed)
        #[arg(long, value_name = "VERSION")]
        current_project_version: Option<u64>,

        /// Minimum macOS version required to run the app (defaults to 14.0)
        #[arg(long, value_name = "VERSION")]
        minimum_macos_version: Option<String>,
    },

    /// Automate the export, packaging, and distribution of the macOS app
    Automate {
        /// Path to the Xcode project
        #[arg(long, value_name = "PATH")]
        project_path: Option<PathBuf>,

        /// Path to the Xcode workspace
        #[arg(long, value_name = "PATH")]
        workspace_path: Option<PathBuf>,

        /// Skip the Sparkle config check and signing the framework
        #[arg(long)]
        skip_sparkle_steps: bool,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_export_with_project_path() {
        let args = Args::parse_from([
            "sparklecast",
            "export",
            "--env",
            "production",
            "--project-path",
            "MyApp.xcodeproj",
        ]);

        assert_eq!(args.env.as_deref(), Some("production"));
        assert!(!args.verbose);
        match args.command {
            Command::Export {
                project_path,
                workspace_path,
                skip_sparkle_steps,
                output_dir,
            } => {
                assert_eq!(project_path, Some(PathBuf::from("MyApp.xcodeproj")));
                assert!(workspace_path.is_none());
                assert!(!skip_sparkle_steps);
                assert!(output_dir.is_none());
            }
            other => panic!("parsed wrong command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_may_follow_the_subcommand() {
        let args = Args::parse_from([
            "sparklecast",
            "distribute",
            "--dmg-path",
            "./MyApp.dmg",
            "--app-display-name",
            "MyApp",
            "--env",
            "local",
            "--verbose",
        ]);

        assert_eq!(args.env.as_deref(), Some("local"));
        assert!(args.verbose);
    }

    #[test]
    fn distribute_accepts_version_overrides() {
        let args = Args::parse_from([
            "sparklecast",
            "distribute",
            "--env",
            "production",
            "--dmg-path",
            "./MyApp.dmg",
            "--app-display-name",
            "MyApp",
            "--marketing-version",
            "2.1.0",
            "--current-project-version",
            "42",
        ]);

        match args.command {
            Command::Distribute {
                marketing_version,
                current_project_version,
                minimum_macos_version,
                ..
            } => {
                assert_eq!(marketing_version.as_deref(), Some("2.1.0"));
                assert_eq!(current_project_version, Some(42));
                assert!(minimum_macos_version.is_none());
            }
            other => panic!("parsed wrong command: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_project_version() {
        let result = Args::try_parse_from([
            "sparklecast",
            "distribute",
            "--env",
            "production",
            "--dmg-path",
            "./MyApp.dmg",
            "--app-display-name",
            "MyApp",
            "--current-project-version",
            "not-a-number",
        ]);

        assert!(result.is_err());
    }
}
