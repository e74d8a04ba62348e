//! sparklecast - Release automation for Sparkle-updated macOS apps.
//!
//! This binary archives, signs, notarizes, and publishes macOS apps that
//! update themselves through Sparkle, with proper credential isolation and
//! appcast feed versioning.

use std::process;

#[tokio::main]
async fn main() {
    // Logging is initialized inside the CLI once --verbose is known.
    let exit_code = match sparklecast::cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    process::exit(exit_code);
}
