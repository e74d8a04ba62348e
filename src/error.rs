//! Error types for the release pipeline.
//!
//! Every failure category the pipeline can hit is named here; nothing is
//! silently swallowed except a missing remote appcast (a valid empty state)
//! and the first DMG unmount failure (which enables the single retry).

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required command-line argument was not supplied
    #[error("Missing required argument: {argument}")]
    MissingArgument {
        /// Argument name as spelled on the command line
        argument: String,
    },

    /// A required key is absent from the loaded environment
    #[error("{key} is not defined in the environment variables")]
    MissingVariable {
        /// Environment key name
        key: String,
    },

    /// Pre-flight validation failed before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external tool exited non-zero
    #[error("Command failed: {command}\n{stderr}")]
    CommandFailed {
        /// The invoked command line (redacted form)
        command: String,
        /// Captured stderr of the child process
        stderr: String,
    },

    /// The certificate label did not end in a parenthesized team identifier
    #[error("Could not extract a team id from certificate label {label:?}")]
    TeamIdUnresolved {
        /// The label as returned by the keychain
        label: String,
    },

    /// Unknown bump policy name in the environment
    #[error("Unsupported bump method name '{0}'")]
    UnsupportedBumpPolicy(String),

    /// The previously published appcast could not be parsed
    #[error("Failed to parse the deployed appcast: {0}")]
    FeedParse(String),

    /// Artifact or appcast upload failed
    #[error("Failed to upload {key}: {source}")]
    Upload {
        /// Remote object key
        key: String,
        /// Underlying storage error
        #[source]
        source: anyhow::Error,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML reader/writer errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Marketing version strings that are not semantic versions
    #[error("Invalid semantic version: {0}")]
    Semver(#[from] semver::Error),

    /// exportOptions.plist serialization errors
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Build a validation error from anything printable
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
