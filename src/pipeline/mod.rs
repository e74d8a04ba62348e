//! Command drivers wiring configuration, the build directory, the run
//! keychain, packaging, and publication together.

pub mod distribute;

use crate::appcast::{self, version::VersionOverrides};
use crate::config::{
    self, DmgLayoutConfig, ProjectConfig, S3Config, SigningConfig, SparkleConfig,
};
use crate::error::{Error, Result};
use crate::keychain;
use crate::packaging::{self, ArchiveRequest};
use crate::storage::{Storage, s3::S3Storage};
use crate::workdir::WorkDir;
use crate::xcode::{self, BuildSettings, ProjectRef};
use std::path::{Path, PathBuf};

/// Oldest macOS a release supports when nothing else says otherwise.
const DEFAULT_MINIMUM_MACOS: &str = "14.0";

pub struct ExportArgs {
    pub env: String,
    pub project_path: Option<PathBuf>,
    pub workspace_path: Option<PathBuf>,
    pub skip_sparkle_steps: bool,
    pub output_dir: Option<PathBuf>,
}

pub struct PackageArgs {
    pub env: String,
    pub app_path: PathBuf,
    pub output_dir: Option<PathBuf>,
}

pub struct DistributeArgs {
    pub env: String,
    pub dmg_path: PathBuf,
    pub app_display_name: String,
    pub marketing_version: Option<String>,
    pub current_project_version: Option<u64>,
    pub minimum_macos_version: Option<String>,
}

pub struct AutomateArgs {
    pub env: String,
    pub project_path: Option<PathBuf>,
    pub workspace_path: Option<PathBuf>,
    pub skip_sparkle_steps: bool,
}

fn output_dir_or_cwd(output_dir: Option<PathBuf>) -> Result<PathBuf> {
    match output_dir {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

/// Archive the app, export it signed, and copy it into the output
/// directory.
pub async fn run_export(args: ExportArgs) -> Result<()> {
    let project = ProjectRef::from_options(args.project_path, args.workspace_path)?;
    config::load_environment(&args.env, project.directory())?;
    let workdir = WorkDir::create(WorkDir::default_path()?).await?;

    let project_config = ProjectConfig::from_env()?;
    let signing = SigningConfig::from_env()?;
    let output_dir = output_dir_or_cwd(args.output_dir)?;

    let settings = BuildSettings::fetch(
        &project,
        &project_config.scheme,
        &project_config.configuration,
    )
    .await?;
    let app_display_name = settings.app_display_name()?.to_string();

    if !args.skip_sparkle_steps {
        xcode::check_sparkle_configuration(&settings)?;
    }

    let project = &project;
    let project_config = &project_config;
    let app_display_name = app_display_name.as_str();
    let output_dir = output_dir.as_path();
    let workdir_ref = &workdir;
    let skip_sparkle_steps = args.skip_sparkle_steps;

    let exported = keychain::with_identity(&signing, &workdir, move |identity| async move {
        packaging::archive_and_sign(
            &ArchiveRequest {
                identity: &identity,
                project,
                project_config,
                app_display_name,
                output_dir: Some(output_dir),
                skip_sparkle_steps,
            },
            workdir_ref,
        )
        .await
    })
    .await?;

    log::info!("✓ Exported the app to {}", exported.display());
    Ok(())
}

/// Package an already exported .app into a signed, notarized DMG.
pub async fn run_package(args: PackageArgs) -> Result<()> {
    let app_path = absolute(&args.app_path)?;
    if !app_path.exists() {
        return Err(Error::validation(format!(
            "No app found at {}",
            app_path.display()
        )));
    }
    let app_display_name = display_name_of(&app_path)?;

    let base_dir = std::env::current_dir()?;
    let env_file = config::load_environment(&args.env, &base_dir)?;
    let env_file_dir = env_file_dir(&env_file, &base_dir);
    let workdir = WorkDir::create(WorkDir::default_path()?).await?;

    let signing = SigningConfig::from_env()?;
    let layout = DmgLayoutConfig::from_env()?;
    let output_dir = output_dir_or_cwd(args.output_dir)?;

    let app_path = app_path.as_path();
    let app_display_name = app_display_name.as_str();
    let layout = &layout;
    let env_file_dir = env_file_dir.as_path();
    let output_dir = output_dir.as_path();
    let workdir_ref = &workdir;

    let dmg_path = keychain::with_identity(&signing, &workdir, move |identity| async move {
        packaging::create_and_sign_dmg(
            app_path,
            app_display_name,
            &identity,
            layout,
            env_file_dir,
            workdir_ref,
            Some(output_dir),
        )
        .await
    })
    .await?;

    log::info!("✓ Packaged the app into a DMG file at {}", dmg_path.display());
    Ok(())
}

/// Sign an existing DMG's update, merge it into the deployed appcast, and
/// publish both.
pub async fn run_distribute(args: DistributeArgs) -> Result<()> {
    if !args.dmg_path.is_file() {
        return Err(Error::validation(format!(
            "No dmg file found at {}",
            args.dmg_path.display()
        )));
    }

    let base_dir = std::env::current_dir()?;
    config::load_environment(&args.env, &base_dir)?;
    let workdir = WorkDir::create(WorkDir::default_path()?).await?;

    let sparkle = SparkleConfig::from_env()?;
    config::storage_type()?;
    let storage = S3Storage::new(&S3Config::from_env()?);

    let deployed = storage.deployed_appcast().await?;
    let overrides = VersionOverrides {
        marketing: args.marketing_version,
        build: args.current_project_version,
    };
    let decision = appcast::compute_next(deployed.as_deref(), sparkle.bump_policy, &overrides)?;
    log::info!(
        "Distributing {} version {decision}...",
        args.app_display_name
    );

    let signature = distribute::sign_update(&args.dmg_path, &sparkle.private_key).await?;

    let minimum_macos_version = args
        .minimum_macos_version
        .unwrap_or_else(|| DEFAULT_MINIMUM_MACOS.to_string());
    let meta = distribute::ReleaseMeta {
        app_display_name: &args.app_display_name,
        title: &sparkle.update_title,
        website_url: &sparkle.website_url,
        release_notes: &sparkle.release_notes,
        minimum_macos_version: &minimum_macos_version,
    };

    distribute::upload_update(
        &storage,
        &workdir,
        &args.dmg_path,
        deployed.as_deref(),
        &decision,
        &signature,
        &meta,
    )
    .await
}

/// The whole delivery in one run: stamp versions, export, package, then
/// distribute.
///
/// The signing identity scope covers only the export and packaging steps;
/// it is torn down before anything touches the network, so an upload
/// failure cannot strand a run keychain.
pub async fn run_automate(args: AutomateArgs) -> Result<()> {
    let project = ProjectRef::from_options(args.project_path, args.workspace_path)?;
    let env_file = config::load_environment(&args.env, project.directory())?;
    let env_file_dir = env_file_dir(&env_file, project.directory());
    let workdir = WorkDir::create(WorkDir::default_path()?).await?;

    let project_config = ProjectConfig::from_env()?;
    let signing = SigningConfig::from_env()?;
    let sparkle = SparkleConfig::from_env()?;
    let layout = DmgLayoutConfig::from_env()?;
    config::storage_type()?;
    let storage = S3Storage::new(&S3Config::from_env()?);

    let deployed = storage.deployed_appcast().await?;
    let decision = appcast::compute_next(
        deployed.as_deref(),
        sparkle.bump_policy,
        &VersionOverrides::default(),
    )?;

    let settings = BuildSettings::fetch(
        &project,
        &project_config.scheme,
        &project_config.configuration,
    )
    .await?;
    let app_display_name = settings.app_display_name()?.to_string();
    let minimum_macos_version = settings
        .minimum_macos_version()
        .map(str::to_string)
        .unwrap_or_else(|_| DEFAULT_MINIMUM_MACOS.to_string());

    if !args.skip_sparkle_steps {
        xcode::check_sparkle_configuration(&settings)?;
    }

    log::info!("Automating the delivery of {app_display_name} version {decision}...");

    xcode::update_project_version(&project, &decision.marketing.to_string(), decision.build)
        .await?;

    let project = &project;
    let project_config = &project_config;
    let display = app_display_name.as_str();
    let layout = &layout;
    let env_file_dir = env_file_dir.as_path();
    let workdir_ref = &workdir;
    let skip_sparkle_steps = args.skip_sparkle_steps;

    let dmg_path = keychain::with_identity(&signing, &workdir, move |identity| async move {
        let exported_app = packaging::archive_and_sign(
            &ArchiveRequest {
                identity: &identity,
                project,
                project_config,
                app_display_name: display,
                output_dir: None,
                skip_sparkle_steps,
            },
            workdir_ref,
        )
        .await?;

        packaging::create_and_sign_dmg(
            &exported_app,
            display,
            &identity,
            layout,
            env_file_dir,
            workdir_ref,
            None,
        )
        .await
    })
    .await?;

    let signature = distribute::sign_update(&dmg_path, &sparkle.private_key).await?;
    let meta = distribute::ReleaseMeta {
        app_display_name: &app_display_name,
        title: &sparkle.update_title,
        website_url: &sparkle.website_url,
        release_notes: &sparkle.release_notes,
        minimum_macos_version: &minimum_macos_version,
    };

    distribute::upload_update(
        &storage,
        &workdir,
        &dmg_path,
        deployed.as_deref(),
        &decision,
        &signature,
        &meta,
    )
    .await
}

/// `My App.app` -> `My App`.
fn display_name_of(app_path: &Path) -> Result<String> {
    app_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::validation("could not derive the app display name from --app-path"))
}

fn env_file_dir(env_file: &Path, fallback: &Path) -> PathBuf {
    env_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fallback.to_path_buf())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
