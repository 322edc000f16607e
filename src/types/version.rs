//! Classification of a dependency version bump.

use serde::{Deserialize, Serialize};

/// The kind of version change a dependency update represents, assuming the
/// version strings follow <https://semver.org/> (a missing patch component,
/// as in "2.6", is read as zero).
///
/// Anything that is not a plain numeric `X.Y.Z` or `X.Y` on both sides, or
/// that does not strictly grow, is `Other` — this includes downgrades and
/// vendor-suffixed versions like `9.4.17.v20190418`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionUpdateType {
    Major,
    Minor,
    Patch,
    Other,
}

impl VersionUpdateType {
    /// Classifies the update from `previous` to `new`.
    ///
    /// - `Major` iff the first component grew.
    /// - `Minor` iff the second component grew with an equal first.
    /// - `Patch` iff only the third component grew.
    /// - `Other` otherwise.
    pub fn classify(previous: &str, new: &str) -> Self {
        let (Some(prev), Some(new)) = (parse_components(previous), parse_components(new)) else {
            return VersionUpdateType::Other;
        };

        if new[0] > prev[0] {
            VersionUpdateType::Major
        } else if new[0] == prev[0] && new[1] > prev[1] {
            VersionUpdateType::Minor
        } else if new[0] == prev[0] && new[1] == prev[1] && new[2] > prev[2] {
            VersionUpdateType::Patch
        } else {
            VersionUpdateType::Other
        }
    }
}

/// Parses `X.Y.Z` or `X.Y` into `[major, minor, patch]`.
fn parse_components(version: &str) -> Option<[u64; 3]> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let mut components = [0u64; 3];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        components[i] = part.parse().ok()?;
    }
    Some(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classify_known_updates() {
        use VersionUpdateType::*;
        assert_eq!(VersionUpdateType::classify("9.4.17.v20190418", "10.0.10"), Other);
        assert_eq!(VersionUpdateType::classify("2.6.0", "2.9.4"), Minor);
        assert_eq!(VersionUpdateType::classify("4.11.0", "5.3.1"), Major);
        assert_eq!(VersionUpdateType::classify("5.1.49", "8.0.28"), Major);
        assert_eq!(VersionUpdateType::classify("0.5.36", "0.6.0"), Minor);
        assert_eq!(VersionUpdateType::classify("1.4.17", "1.4.18"), Patch);
    }

    #[test]
    fn two_component_versions_are_accepted() {
        assert_eq!(
            VersionUpdateType::classify("2.6", "3.0"),
            VersionUpdateType::Major
        );
        assert_eq!(
            VersionUpdateType::classify("2.6", "2.7"),
            VersionUpdateType::Minor
        );
        // "2.6" reads as 2.6.0
        assert_eq!(
            VersionUpdateType::classify("2.6", "2.6.1"),
            VersionUpdateType::Patch
        );
    }

    #[test]
    fn downgrades_and_no_ops_are_other() {
        assert_eq!(
            VersionUpdateType::classify("2.0.0", "1.9.9"),
            VersionUpdateType::Other
        );
        assert_eq!(
            VersionUpdateType::classify("1.2.3", "1.2.3"),
            VersionUpdateType::Other
        );
        assert_eq!(
            VersionUpdateType::classify("1.3.0", "1.2.9"),
            VersionUpdateType::Other
        );
    }

    #[test]
    fn non_numeric_versions_are_other() {
        assert_eq!(
            VersionUpdateType::classify("1.2.3-SNAPSHOT", "1.2.4"),
            VersionUpdateType::Other
        );
        assert_eq!(
            VersionUpdateType::classify("unknown", "unknown"),
            VersionUpdateType::Other
        );
    }

    proptest! {
        #[test]
        fn serde_roundtrip(kind in prop_oneof![
            Just(VersionUpdateType::Major),
            Just(VersionUpdateType::Minor),
            Just(VersionUpdateType::Patch),
            Just(VersionUpdateType::Other),
        ]) {
            let json = serde_json::to_string(&kind).unwrap();
            let parsed: VersionUpdateType = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(kind, parsed);
        }

        /// Growing any single component (with the earlier ones fixed) never
        /// classifies as Other.
        #[test]
        fn strict_growth_is_never_other(
            major in 0u64..1000,
            minor in 0u64..1000,
            patch in 0u64..1000,
            bump in 1u64..100,
            component in 0usize..3,
        ) {
            let prev = [major, minor, patch];
            let mut new = prev;
            new[component] += bump;
            let prev_s = format!("{}.{}.{}", prev[0], prev[1], prev[2]);
            let new_s = format!("{}.{}.{}", new[0], new[1], new[2]);
            prop_assert_ne!(
                VersionUpdateType::classify(&prev_s, &new_s),
                VersionUpdateType::Other
            );
        }
    }
}
