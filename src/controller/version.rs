//! Comparison of k0s versions
//!
//! k0s versions are semantic versions with an optional build suffix
//! (`v1.31.2+k0s.0`). Machines and plans frequently drop the suffix, so a
//! missing suffix is read as the baseline build `k0s.0` whenever the other
//! side carries one. Two versions that both lack a suffix compare on the core
//! alone. This treats distinct builds that both omit the suffix as equal.

use std::cmp::Ordering;

use semver::Version;

use crate::controller::error::{Error, Result};

/// Build suffix assumed when a version omits it
pub const DEFAULT_BUILD_SUFFIX: &str = "k0s.0";

/// Split a version into its semantic core and optional build suffix
pub fn normalize(version: &str) -> Result<(Version, Option<String>)> {
    let trimmed = version.trim();
    let without_prefix = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let (core, build) = match without_prefix.split_once('+') {
        Some((core, build)) => {
            if build.is_empty() {
                return Err(Error::InvalidVersion(format!(
                    "{}: empty build suffix",
                    version
                )));
            }
            (core, Some(build.to_string()))
        }
        None => (without_prefix, None),
    };

    let parsed =
        Version::parse(core).map_err(|e| Error::InvalidVersion(format!("{}: {}", version, e)))?;

    Ok((parsed, build))
}

/// Normalize both sides, defaulting a one-sided missing suffix
fn normalize_pair(a: &str, b: &str) -> Result<((Version, Option<String>), (Version, Option<String>))> {
    let (core_a, build_a) = normalize(a)?;
    let (core_b, build_b) = normalize(b)?;

    let (build_a, build_b) = match (build_a, build_b) {
        (Some(x), None) => (Some(x), Some(DEFAULT_BUILD_SUFFIX.to_string())),
        (None, Some(y)) => (Some(DEFAULT_BUILD_SUFFIX.to_string()), Some(y)),
        other => other,
    };

    Ok(((core_a, build_a), (core_b, build_b)))
}

/// Order two build suffixes, numerically on the trailing build number when both have one
fn compare_builds(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (build_number(a), build_number(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.cmp(b),
        },
        _ => Ordering::Equal,
    }
}

fn build_number(build: &str) -> Option<u64> {
    build.rsplit('.').next().and_then(|n| n.parse().ok())
}

/// Full ordering of two versions
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    let ((core_a, build_a), (core_b, build_b)) = normalize_pair(a, b)?;

    // Build metadata is ignored by semver precedence, so compare cores first
    Ok(core_a
        .cmp_precedence(&core_b)
        .then_with(|| compare_builds(build_a.as_deref(), build_b.as_deref())))
}

/// Whether two versions denote the same release
pub fn equal(a: &str, b: &str) -> Result<bool> {
    Ok(compare(a, b)? == Ordering::Equal)
}

/// Whether `a` is an older release than `b`
pub fn less_than(a: &str, b: &str) -> Result<bool> {
    Ok(compare(a, b)? == Ordering::Less)
}

/// Lowest version in a set, returned as written
///
/// Returns `None` for an empty set. Any malformed entry fails the whole call.
pub fn lowest<'a, I>(versions: I) -> Result<Option<&'a str>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut lowest: Option<&str> = None;
    for version in versions {
        // Validate every entry, including the first
        normalize(version)?;
        let replace = match lowest {
            Some(current) => less_than(version, current)?,
            None => true,
        };
        if replace {
            lowest = Some(version);
        }
    }
    Ok(lowest)
}

/// Build suffix of a version, if any
pub fn build_suffix(version: &str) -> Result<Option<String>> {
    Ok(normalize(version)?.1)
}

/// Append the desired version's build suffix to `reported` when only the desired one has it
///
/// Consumers compare the reported fleet version with the desired version as
/// strings, so a converged fleet must report the same suffix.
pub fn align_suffix(reported: &str, desired: &str) -> Result<String> {
    match (build_suffix(reported)?, build_suffix(desired)?) {
        (None, Some(suffix)) => Ok(format!("{}+{}", reported, suffix)),
        _ => Ok(reported.to_string()),
    }
}

/// Reject upgrades that cross majors, skip a minor, or go back a minor
pub fn check_upgrade_skew(from: &str, to: &str) -> Result<()> {
    let (from_core, _) = normalize(from)?;
    let (to_core, _) = normalize(to)?;

    let skew = || Error::VersionSkew {
        from: from.to_string(),
        to: to.to_string(),
    };

    if from_core.major != to_core.major {
        return Err(skew());
    }
    if to_core.minor > from_core.minor + 1 || to_core.minor < from_core.minor {
        return Err(skew());
    }

    Ok(())
}
