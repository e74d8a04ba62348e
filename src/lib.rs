//! Release automation for Sparkle-updated macOS apps
//!
//! This library drives the full delivery of a notarized macOS release:
//! - Archiving and exporting a signed .app from an Xcode project
//! - Packaging it into a customized, signed, notarized DMG
//! - Publishing the update through a Sparkle appcast feed on S3
//!
//! Code signing happens inside an ephemeral keychain that is created for
//! the run and removed afterwards, so credentials never touch the login
//! keychain. It can be used both as a CLI tool and as a library dependency.

pub mod appcast;
pub mod cli;
pub mod config;
pub mod dmg;
pub mod error;
pub mod exec;
pub mod keychain;
pub mod packaging;
pub mod pipeline;
pub mod storage;
pub mod workdir;
pub mod xcode;

// Re-export commonly used types
pub use error::{Error, Result};
