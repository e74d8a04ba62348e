//! Command line interface for sparklecast.

mod args;

pub use args::{Args, Command};

use crate::error::{Error, Result};
use crate::pipeline::{self, AutomateArgs, DistributeArgs, ExportArgs, PackageArgs};

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    init_logging(args.verbose);

    dispatch(args).await?;
    Ok(0)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_target(false)
        .format_timestamp(None)
        .init();
}

async fn dispatch(args: Args) -> Result<()> {
    let env = args.env.ok_or(Error::MissingArgument {
        argument: "--env".to_string(),
    })?;

    match args.command {
        Command::Export {
            project_path,
            workspace_path,
            skip_sparkle_steps,
            output_dir,
        } => {
            pipeline::run_export(ExportArgs {
                env,
                project_path,
                workspace_path,
                skip_sparkle_steps,
                output_dir,
            })
            .await
        }
        Command::Package {
            app_path,
            output_dir,
        } => {
            pipeline::run_package(PackageArgs {
                env,
                app_path,
                output_dir,
            })
            .await
        }
        Command::Distribute {
            dmg_path,
            app_display_name,
            marketing_version,
            current_project_version,
            minimum_macos_version,
        } => {
            pipeline::run_distribute(DistributeArgs {
                env,
                dmg_path,
                app_display_name,
                marketing_version,
                current_project_version,
                minimum_macos_version,
            })
            .await
        }
        Command::Automate {
            project_path,
            workspace_path,
            skip_sparkle_steps,
        } => {
            pipeline::run_automate(AutomateArgs {
                env,
                project_path,
                workspace_path,
                skip_sparkle_steps,
            })
            .await
        }
    }
}
