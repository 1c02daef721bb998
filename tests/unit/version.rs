//! Unit tests for k0s version comparison

use k0s_controlplane_operator::controller::Error;
use k0s_controlplane_operator::controller::version::{
    align_suffix, check_upgrade_skew, equal, less_than, lowest, normalize,
};

mod comparison_tests {
    use super::*;

    #[test]
    fn test_missing_suffix_equals_baseline_build() {
        assert!(equal("v1.31.0", "v1.31.0+k0s.0").unwrap());
        assert!(equal("v1.31.0+k0s.0", "v1.31.0").unwrap());
    }

    #[test]
    fn test_both_without_suffix_compare_on_core() {
        assert!(equal("v1.31.0", "1.31.0").unwrap());
        assert!(!equal("v1.31.0", "v1.31.1").unwrap());
    }

    #[test]
    fn test_different_builds_differ() {
        assert!(!equal("v1.31.0+k0s.1", "v1.31.0+k0s.0").unwrap());
        assert!(less_than("v1.31.0+k0s.0", "v1.31.0+k0s.1").unwrap());
    }

    #[test]
    fn test_build_numbers_compare_numerically() {
        assert!(less_than("v1.31.0+k0s.2", "v1.31.0+k0s.10").unwrap());
    }

    #[test]
    fn test_core_outranks_build() {
        assert!(less_than("v1.30.9+k0s.5", "v1.31.0+k0s.0").unwrap());
        assert!(!less_than("v1.31.0", "v1.30.9+k0s.5").unwrap());
    }

    #[test]
    fn test_less_than_is_strict() {
        assert!(!less_than("v1.31.0", "v1.31.0+k0s.0").unwrap());
    }

    #[test]
    fn test_malformed_versions_error() {
        assert!(matches!(equal("v1.31", "v1.31.0"), Err(Error::InvalidVersion(_))));
        assert!(matches!(less_than("v1.31.0", "next"), Err(Error::InvalidVersion(_))));
    }

    #[test]
    fn test_normalize_accepts_missing_prefix() {
        let (core, build) = normalize("1.30.4+k0s.0").unwrap();
        assert_eq!(core.to_string(), "1.30.4");
        assert_eq!(build.as_deref(), Some("k0s.0"));
    }
}

mod lowest_tests {
    use super::*;

    #[test]
    fn test_lowest_of_mixed_set() {
        let versions = ["v1.31.2+k0s.0", "v1.30.4", "v1.31.0"];
        assert_eq!(lowest(versions).unwrap(), Some("v1.30.4"));
    }

    #[test]
    fn test_lowest_returns_version_as_written() {
        let versions = ["v1.31.0+k0s.1", "v1.31.0"];
        assert_eq!(lowest(versions).unwrap(), Some("v1.31.0"));
    }

    #[test]
    fn test_lowest_of_empty_set() {
        assert_eq!(lowest(Vec::<&str>::new()).unwrap(), None);
    }

    #[test]
    fn test_lowest_single_malformed_entry_fails() {
        assert!(matches!(lowest(["garbage"]), Err(Error::InvalidVersion(_))));
        assert!(lowest(["v1.31.0", "v1.x"]).is_err());
    }

    #[test]
    fn test_align_suffix() {
        assert_eq!(
            align_suffix("v1.30.4", "v1.31.2+k0s.0").unwrap(),
            "v1.30.4+k0s.0"
        );
        assert_eq!(
            align_suffix("v1.30.4+k0s.1", "v1.31.2+k0s.0").unwrap(),
            "v1.30.4+k0s.1"
        );
        assert_eq!(align_suffix("v1.30.4", "v1.31.2").unwrap(), "v1.30.4");
    }
}

mod skew_tests {
    use super::*;

    #[test]
    fn test_next_minor_allowed() {
        assert!(check_upgrade_skew("v1.30.4+k0s.0", "v1.31.2+k0s.0").is_ok());
    }

    #[test]
    fn test_patch_and_build_changes_allowed() {
        assert!(check_upgrade_skew("v1.31.0", "v1.31.2").is_ok());
        assert!(check_upgrade_skew("v1.31.2+k0s.0", "v1.31.2+k0s.1").is_ok());
    }

    #[test]
    fn test_minor_skip_rejected() {
        assert!(matches!(
            check_upgrade_skew("v1.29.0", "v1.31.0"),
            Err(Error::VersionSkew { .. })
        ));
    }

    #[test]
    fn test_minor_downgrade_rejected() {
        assert!(check_upgrade_skew("v1.31.0", "v1.30.0").is_err());
    }

    #[test]
    fn test_major_change_rejected() {
        assert!(check_upgrade_skew("v1.31.0", "v2.0.0").is_err());
    }
}
