//! A minimal Maven POM model.
//!
//! Only the parts needed to locate which section declares an updated
//! dependency are modeled: top-level dependencies, build plugins and plugin
//! management (each with their nested dependencies), dependency management,
//! and the profile-scoped equivalents.

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::types::DependencySection;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub dependencies: DependencyList,
    pub build: Option<Build>,
    pub dependency_management: Option<DependencyManagement>,
    pub profiles: ProfileList,
}

#[derive(Debug, Default, Deserialize)]
pub struct DependencyList {
    #[serde(rename = "dependency", default)]
    pub entries: Vec<PomDependency>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PomDependency {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
}

impl PomDependency {
    fn matches(&self, group_id: &str, artifact_id: &str) -> bool {
        self.group_id.as_deref() == Some(group_id)
            && self.artifact_id.as_deref() == Some(artifact_id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Build {
    pub plugins: Option<PluginList>,
    pub plugin_management: Option<PluginManagement>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PluginList {
    #[serde(rename = "plugin", default)]
    pub entries: Vec<PomPlugin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PomPlugin {
    pub dependencies: DependencyList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PluginManagement {
    pub plugins: Option<PluginList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DependencyManagement {
    pub dependencies: DependencyList,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileList {
    #[serde(rename = "profile", default)]
    pub entries: Vec<Profile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub dependencies: DependencyList,
    pub build: Option<ProfileBuild>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileBuild {
    pub plugins: Option<PluginList>,
}

/// Parses a POM document.
pub fn parse(xml: &str) -> Result<Project, quick_xml::DeError> {
    from_str(xml)
}

fn plugin_dependencies(plugins: &Option<PluginList>) -> impl Iterator<Item = &PomDependency> {
    plugins
        .iter()
        .flat_map(|list| list.entries.iter())
        .flat_map(|plugin| plugin.dependencies.entries.iter())
}

/// Locates the section declaring the `(groupId, artifactId)` coordinate.
///
/// Sections are checked in a fixed order: dependencies, build plugins, build
/// plugin management, dependency management, then the profile-scoped
/// dependency and plugin sections. A coordinate found nowhere is `Unknown`.
pub fn locate_section(project: &Project, group_id: &str, artifact_id: &str) -> DependencySection {
    let found = |deps: &DependencyList| deps.entries.iter().any(|d| d.matches(group_id, artifact_id));

    if found(&project.dependencies) {
        return DependencySection::Dependencies;
    }

    if let Some(build) = &project.build {
        if plugin_dependencies(&build.plugins).any(|d| d.matches(group_id, artifact_id)) {
            return DependencySection::BuildPlugins;
        }
        if let Some(management) = &build.plugin_management {
            if plugin_dependencies(&management.plugins).any(|d| d.matches(group_id, artifact_id)) {
                return DependencySection::BuildPluginManagement;
            }
        }
    }

    if let Some(management) = &project.dependency_management {
        if found(&management.dependencies) {
            return DependencySection::DependencyManagement;
        }
    }

    for profile in &project.profiles.entries {
        if found(&profile.dependencies) {
            return DependencySection::ProfileDependencies;
        }
        if let Some(build) = &profile.build {
            if plugin_dependencies(&build.plugins).any(|d| d.matches(group_id, artifact_id)) {
                return DependencySection::ProfileBuildPlugins;
            }
        }
    }

    DependencySection::Unknown
}
