//! Marketing-version and build-number derivation.
//!
//! The marketing version is a semantic triple bumped per the configured
//! policy; the build number is an independent, strictly increasing integer.
//! A feed with no prior entries bootstraps at `1.0.0` / `1`.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;
use std::str::FromStr;

/// First-ever release pair used when no appcast has been published yet.
pub const BOOTSTRAP_MARKETING_VERSION: &str = "1.0.0";
/// Build number paired with [`BOOTSTRAP_MARKETING_VERSION`].
pub const BOOTSTRAP_BUILD_NUMBER: u64 = 1;

/// Rule for deriving the next marketing version from the latest published one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpPolicy {
    Major,
    Minor,
    Patch,
    /// Reuse the latest marketing version verbatim.
    Same,
}

impl FromStr for BumpPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "major" => Ok(BumpPolicy::Major),
            "minor" => Ok(BumpPolicy::Minor),
            "patch" => Ok(BumpPolicy::Patch),
            "same" => Ok(BumpPolicy::Same),
            other => Err(Error::UnsupportedBumpPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for BumpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BumpPolicy::Major => "major",
            BumpPolicy::Minor => "minor",
            BumpPolicy::Patch => "patch",
            BumpPolicy::Same => "same",
        };
        f.write_str(name)
    }
}

/// Caller-supplied version values that bypass derivation on their axis.
#[derive(Debug, Clone, Default)]
pub struct VersionOverrides {
    /// Explicit marketing version (`--marketing-version`)
    pub marketing: Option<String>,
    /// Explicit build number (`--current-project-version`)
    pub build: Option<u64>,
}

/// The computed (marketing version, build number) pair for this release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecision {
    pub marketing: Version,
    pub build: u64,
}

impl fmt::Display for VersionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.marketing, self.build)
    }
}

/// Apply semantic-version bump arithmetic.
///
/// Bumping major resets minor and patch; bumping minor resets patch;
/// `same` returns the input unchanged.
pub fn bump(version: &Version, policy: BumpPolicy) -> Version {
    let mut next = Version::new(version.major, version.minor, version.patch);
    match policy {
        BumpPolicy::Major => {
            next.major += 1;
            next.minor = 0;
            next.patch = 0;
        }
        BumpPolicy::Minor => {
            next.minor += 1;
            next.patch = 0;
        }
        BumpPolicy::Patch => {
            next.patch += 1;
        }
        BumpPolicy::Same => {}
    }
    next
}

/// Derive the next version pair from the versions found in the deployed feed.
///
/// `published` holds (marketing versions, build numbers) scanned from the
/// existing entries; `None` means no appcast has been published yet, which
/// yields the bootstrap pair regardless of policy. The build number is
/// always `max + 1`. Overrides apply per axis and, when both are supplied,
/// skip derivation entirely.
pub fn compute_next(
    published: Option<(&[Version], &[u64])>,
    policy: BumpPolicy,
    overrides: &VersionOverrides,
) -> Result<VersionDecision> {
    let marketing_override = overrides
        .marketing
        .as_deref()
        .map(Version::parse)
        .transpose()?;

    if let (Some(marketing), Some(build)) = (marketing_override.clone(), overrides.build) {
        return Ok(VersionDecision { marketing, build });
    }

    let (derived_marketing, derived_build) = match published {
        None => (
            Version::parse(BOOTSTRAP_MARKETING_VERSION)?,
            BOOTSTRAP_BUILD_NUMBER,
        ),
        Some((marketing_versions, build_numbers)) => {
            let latest = marketing_versions
                .iter()
                .max()
                .ok_or_else(|| Error::FeedParse("no marketing versions in feed".to_string()))?;
            let max_build = build_numbers
                .iter()
                .max()
                .copied()
                .ok_or_else(|| Error::FeedParse("no build numbers in feed".to_string()))?;
            (bump(latest, policy), max_build + 1)
        }
    };

    Ok(VersionDecision {
        marketing: marketing_override.unwrap_or(derived_marketing),
        build: overrides.build.unwrap_or(derived_build),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(strs: &[&str]) -> Vec<Version> {
        strs.iter().map(|s| Version::parse(s).unwrap()).collect()
    }

    #[test]
    fn build_number_is_max_plus_one_for_any_policy() {
        let marketing = versions(&["1.0.0"]);
        let builds = [3, 7, 5];
        for policy in [
            BumpPolicy::Major,
            BumpPolicy::Minor,
            BumpPolicy::Patch,
            BumpPolicy::Same,
        ] {
            let decision =
                compute_next(Some((&marketing, &builds)), policy, &Default::default()).unwrap();
            assert_eq!(decision.build, 8, "policy {policy}");
        }
    }

    #[test]
    fn bump_arithmetic_from_2_3_1() {
        let latest = versions(&["2.3.1"]);
        let builds = [1];
        let cases = [
            (BumpPolicy::Minor, "2.4.0"),
            (BumpPolicy::Major, "3.0.0"),
            (BumpPolicy::Patch, "2.3.2"),
            (BumpPolicy::Same, "2.3.1"),
        ];
        for (policy, expected) in cases {
            let decision =
                compute_next(Some((&latest, &builds)), policy, &Default::default()).unwrap();
            assert_eq!(decision.marketing.to_string(), expected, "policy {policy}");
        }
    }

    #[test]
    fn maximum_marketing_version_wins_not_document_order() {
        let marketing = versions(&["1.2.0", "2.0.1", "1.9.9"]);
        let builds = [1, 2, 3];
        let decision = compute_next(
            Some((&marketing, &builds)),
            BumpPolicy::Patch,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(decision.marketing.to_string(), "2.0.2");
    }

    #[test]
    fn empty_feed_bootstraps_regardless_of_policy() {
        for policy in [
            BumpPolicy::Major,
            BumpPolicy::Minor,
            BumpPolicy::Patch,
            BumpPolicy::Same,
        ] {
            let decision = compute_next(None, policy, &Default::default()).unwrap();
            assert_eq!(decision.marketing.to_string(), "1.0.0");
            assert_eq!(decision.build, 1);
        }
    }

    #[test]
    fn overrides_short_circuit_derivation() {
        let overrides = VersionOverrides {
            marketing: Some("9.9.9".to_string()),
            build: Some(42),
        };
        // No published feed required when both axes are overridden.
        let decision = compute_next(None, BumpPolicy::Major, &overrides).unwrap();
        assert_eq!(decision.marketing.to_string(), "9.9.9");
        assert_eq!(decision.build, 42);
    }

    #[test]
    fn single_axis_override_keeps_the_other_derived() {
        let marketing = versions(&["1.0.0"]);
        let builds = [4];
        let overrides = VersionOverrides {
            marketing: Some("2.5.0".to_string()),
            build: None,
        };
        let decision =
            compute_next(Some((&marketing, &builds)), BumpPolicy::Patch, &overrides).unwrap();
        assert_eq!(decision.marketing.to_string(), "2.5.0");
        assert_eq!(decision.build, 5);
    }

    #[test]
    fn unknown_policy_name_is_rejected() {
        let err = "rolling".parse::<BumpPolicy>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported bump method name 'rolling'");
    }
}
