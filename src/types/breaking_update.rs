//! The benchmark record for a breaking dependency update.
//!
//! One `BreakingUpdate` is persisted as one JSON file keyed by the breaking
//! commit hash. The same record type covers all three partitions: a freshly
//! mined candidate has none of the reproduction fields set, a record under
//! `benchmark/` has all of them, and a record under `unsuccessful/` carries
//! only the Java version. The partition directory, not a type hierarchy, is
//! the source of truth for which variant applies.

use serde::{Deserialize, Serialize};

use super::ids::Sha;
use super::version::VersionUpdateType;

/// Default Java version for reproduction, matching the Maven base image.
pub const DEFAULT_JAVA_VERSION: &str = "11";

/// Classification of the account that authored a PR or commit.
///
/// `Unknown` is stored verbatim when the Forge has no author on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    Human,
    Bot,
    Unknown,
}

/// Login fragments that mark an account as a dependency bot even when the
/// Forge does not flag it with the `Bot` account type.
const BOT_LOGIN_FRAGMENTS: &[&str] = &["dependabot", "renovate"];

impl AuthorType {
    /// Maps a Forge account to an author type.
    ///
    /// An account is a bot iff the Forge marks its type as `Bot` or its login
    /// contains a known dependency-bot substring, case-insensitively.
    pub fn from_account(account_type: &str, login: &str) -> Self {
        let login = login.to_lowercase();
        if account_type == "Bot" || BOT_LOGIN_FRAGMENTS.iter().any(|f| login.contains(f)) {
            AuthorType::Bot
        } else {
            AuthorType::Human
        }
    }
}

/// The Maven scope of the updated dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    #[default]
    Compile,
    Provided,
    Runtime,
    System,
    Import,
}

impl DependencyScope {
    /// Parses a `<scope>` value from a POM, defaulting to `compile` on
    /// anything unrecognized.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "provided" => DependencyScope::Provided,
            "runtime" => DependencyScope::Runtime,
            "system" => DependencyScope::System,
            "import" => DependencyScope::Import,
            _ => DependencyScope::Compile,
        }
    }
}

/// The POM section in which the updated dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencySection {
    Dependencies,
    BuildPlugins,
    BuildPluginManagement,
    DependencyManagement,
    ProfileDependencies,
    ProfileBuildPlugins,
    Unknown,
}

/// The kind of artifact that was found in the local Maven repository for the
/// updated dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdatedFileType {
    Pom,
    Jar,
}

/// The category of build failure observed when reproducing a breaking update.
///
/// Several categories beyond the four core ones are recognized by dedicated
/// plugin-signature rules; see `reproducer::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    CompilationFailure,
    TestFailure,
    DependencyResolutionFailure,
    MavenEnforcerFailure,
    DependencyLockFailure,
    JenkinsPluginFailure,
    JaxbFailure,
    ScmCheckoutFailure,
    CheckstyleFailure,
    WerrorFailure,
    UnknownFailure,
}

impl FailureCategory {
    /// The wire name, as used in JSON records and image labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::CompilationFailure => "COMPILATION_FAILURE",
            FailureCategory::TestFailure => "TEST_FAILURE",
            FailureCategory::DependencyResolutionFailure => "DEPENDENCY_RESOLUTION_FAILURE",
            FailureCategory::MavenEnforcerFailure => "MAVEN_ENFORCER_FAILURE",
            FailureCategory::DependencyLockFailure => "DEPENDENCY_LOCK_FAILURE",
            FailureCategory::JenkinsPluginFailure => "JENKINS_PLUGIN_FAILURE",
            FailureCategory::JaxbFailure => "JAXB_FAILURE",
            FailureCategory::ScmCheckoutFailure => "SCM_CHECKOUT_FAILURE",
            FailureCategory::CheckstyleFailure => "CHECKSTYLE_FAILURE",
            FailureCategory::WerrorFailure => "WERROR_FAILURE",
            FailureCategory::UnknownFailure => "UNKNOWN_FAILURE",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about the dependency changed by the breaking update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedDependency {
    #[serde(rename = "dependencyGroupID")]
    pub dependency_group_id: String,
    #[serde(rename = "dependencyArtifactID")]
    pub dependency_artifact_id: String,
    pub previous_version: String,
    pub new_version: String,
    pub dependency_scope: DependencyScope,
    pub version_update_type: VersionUpdateType,
    pub dependency_section: DependencySection,
}

impl UpdatedDependency {
    /// The groupId with dots replaced by path separators, as used in the
    /// local Maven repository layout.
    pub fn group_path(&self) -> String {
        self.dependency_group_id.replace('.', "/")
    }

    /// Path of a dependency artifact inside a build container's local Maven
    /// repository, e.g. `/root/.m2/repository/org/x/y/1.0/y-1.0.jar`.
    pub fn m2_artifact_path(&self, version: &str, extension: &str) -> String {
        format!(
            "/root/.m2/repository/{}/{}/{}/{}-{}.{}",
            self.group_path(),
            self.dependency_artifact_id,
            version,
            self.dependency_artifact_id,
            version,
            extension
        )
    }
}

/// A dependency update that breaks a CI workflow: the unit of the benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingUpdate {
    /// The PR page on the Forge.
    pub url: String,
    pub project: String,
    pub project_organisation: String,
    pub breaking_commit: Sha,
    pub pr_author: AuthorType,
    pub pre_commit_author: AuthorType,
    pub breaking_commit_author: AuthorType,
    /// License name reported by the Forge, or `"unknown"`.
    pub license_info: String,
    pub updated_dependency: UpdatedDependency,

    // Reproduction fields. All unset until the reproducer has run; a record
    // in `unsuccessful/` carries only the Java version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version_used_for_reproduction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_commit_reproduction_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaking_update_reproduction_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_compare_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maven_source_link_pre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maven_source_link_breaking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_file_type: Option<UpdatedFileType>,
}

impl BreakingUpdate {
    /// The repository page URL, derived by stripping the `/pull/<n>` suffix
    /// from the PR URL. Used as the clone target during reproduction.
    pub fn project_url(&self) -> &str {
        self.url.split("/pull/").next().unwrap_or(&self.url)
    }
}
