//! Maps Maven build-log text to a failure category.
//!
//! Rules are case-insensitive substring matches tried in a fixed priority
//! order; the first match wins. A compilation error therefore outranks the
//! test-failure summary that usually follows it in the same log.

use std::path::Path;

use crate::types::FailureCategory;

/// The classification rules, in priority order.
///
/// The plugin-signature rules sit between the enforcer rule and the generic
/// dependency-resolution rule: a checkstyle or lockfile failure also prints
/// a generic goal-failed line, so the specific signature has to be tried
/// first.
const RULES: &[(&str, FailureCategory)] = &[
    ("compilation error :", FailureCategory::CompilationFailure),
    (
        "failed to execute goal org.apache.maven.plugins:maven-enforcer-plugin",
        FailureCategory::MavenEnforcerFailure,
    ),
    (
        "dependency-lock-maven-plugin",
        FailureCategory::DependencyLockFailure,
    ),
    ("maven-hpi-plugin", FailureCategory::JenkinsPluginFailure),
    ("maven-jaxb2-plugin", FailureCategory::JaxbFailure),
    ("error checking out", FailureCategory::ScmCheckoutFailure),
    (
        "maven-checkstyle-plugin",
        FailureCategory::CheckstyleFailure,
    ),
    (
        "warnings found and -werror specified",
        FailureCategory::WerrorFailure,
    ),
    (
        "could not resolve dependencies",
        FailureCategory::DependencyResolutionFailure,
    ),
    ("[error] tests run:", FailureCategory::TestFailure),
    ("there are test failures", FailureCategory::TestFailure),
];

/// Classifies a build log.
pub fn classify(log: &str) -> FailureCategory {
    let haystack = log.to_lowercase();
    for (needle, category) in RULES {
        if haystack.contains(needle) {
            return *category;
        }
    }
    FailureCategory::UnknownFailure
}

/// Classifies a build log stored on disk.
pub fn classify_file(path: &Path) -> std::io::Result<FailureCategory> {
    Ok(classify(&std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_patterns() {
        assert_eq!(
            classify("[INFO] ----\n[ERROR] COMPILATION ERROR : \n[INFO] ----"),
            FailureCategory::CompilationFailure
        );
        assert_eq!(
            classify("[ERROR] Failed to execute goal org.apache.maven.plugins:maven-enforcer-plugin:3.0.0:enforce"),
            FailureCategory::MavenEnforcerFailure
        );
        assert_eq!(
            classify("[ERROR] Could not resolve dependencies for project x"),
            FailureCategory::DependencyResolutionFailure
        );
        assert_eq!(
            classify("[ERROR] Tests run: 10, Failures: 2, Errors: 0"),
            FailureCategory::TestFailure
        );
        assert_eq!(
            classify("[ERROR] There are test failures."),
            FailureCategory::TestFailure
        );
        assert_eq!(classify("mvn: command exploded"), FailureCategory::UnknownFailure);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            classify("[error] compilation error : cannot find symbol"),
            FailureCategory::CompilationFailure
        );
    }

    #[test]
    fn compilation_outranks_test_failure() {
        // A compile break usually also prints the surefire summary; the
        // compilation rule must win.
        let log = "[ERROR] COMPILATION ERROR : \n[ERROR] Tests run: 3, Failures: 1";
        assert_eq!(classify(log), FailureCategory::CompilationFailure);
    }

    #[test]
    fn enforcer_outranks_resolution() {
        let log = "[ERROR] Failed to execute goal org.apache.maven.plugins:maven-enforcer-plugin\n\
                   [ERROR] Could not resolve dependencies";
        assert_eq!(classify(log), FailureCategory::MavenEnforcerFailure);
    }

    #[test]
    fn plugin_signatures() {
        assert_eq!(
            classify("[ERROR] Failed to execute goal se.vandmo:dependency-lock-maven-plugin:check"),
            FailureCategory::DependencyLockFailure
        );
        assert_eq!(
            classify("[ERROR] Failed to execute goal org.jenkins-ci.tools:maven-hpi-plugin:3.37"),
            FailureCategory::JenkinsPluginFailure
        );
        assert_eq!(
            classify("[ERROR] Failed to execute goal org.jvnet.jaxb2.maven2:maven-jaxb2-plugin"),
            FailureCategory::JaxbFailure
        );
        assert_eq!(
            classify("[ERROR] Error checking out: svn: E170000"),
            FailureCategory::ScmCheckoutFailure
        );
        assert_eq!(
            classify("[ERROR] Failed to execute goal org.apache.maven.plugins:maven-checkstyle-plugin"),
            FailureCategory::CheckstyleFailure
        );
        assert_eq!(
            classify("[ERROR] warnings found and -Werror specified"),
            FailureCategory::WerrorFailure
        );
    }

    #[test]
    fn empty_log_is_unknown() {
        assert_eq!(classify(""), FailureCategory::UnknownFailure);
    }
}
