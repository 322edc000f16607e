//! Shared test helpers: diff fixtures and a scripted in-memory container
//! runner that drives the reproduction state machine without a daemon.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::container::{CommitOptions, ContainerError, ContainerRunner, RegistryCredentials};
use crate::reproducer::BASE_MAVEN_IMAGE;

/// A one-line dependency version bump in a POM, as scenario fixtures use it:
/// jetty-server `9.4.17.v20190418` → `10.0.10`.
pub fn jetty_bump_diff() -> String {
    "diff --git a/pom.xml b/pom.xml\n\
     index 0123456..89abcde 100644\n\
     --- a/pom.xml\n\
     +++ b/pom.xml\n\
     @@ -37,7 +37,7 @@\n\
     \x20        <dependency>\n\
     \x20            <groupId>org.eclipse.jetty</groupId>\n\
     \x20            <artifactId>jetty-server</artifactId>\n\
     -        <version>9.4.17.v20190418</version>\n\
     +        <version>10.0.10</version>\n\
     \x20        </dependency>\n\
     \x20    </dependencies>\n"
        .to_string()
}

/// A diff touching a POM and a second file.
pub fn two_file_diff() -> String {
    let mut diff = jetty_bump_diff();
    diff.push_str(
        "diff --git a/README.md b/README.md\n\
         index 1111111..2222222 100644\n\
         --- a/README.md\n\
         +++ b/README.md\n\
         @@ -1,1 +1,1 @@\n\
         -old text\n\
         +new text\n",
    );
    diff
}

/// The scripted outcome of one Maven build container.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub exit: i64,
    pub log: String,
    /// Extra files present in the container after the run, e.g. dependency
    /// artifacts in the local Maven repository.
    pub files: Vec<(String, Vec<u8>)>,
}

impl ScriptedRun {
    pub fn passing() -> Self {
        ScriptedRun {
            exit: 0,
            log: "[INFO] BUILD SUCCESS".to_string(),
            files: Vec::new(),
        }
    }

    pub fn failing(exit: i64, log: impl Into<String>) -> Self {
        ScriptedRun {
            exit,
            log: log.into(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }
}

#[derive(Debug)]
struct FakeContainer {
    image: String,
    cmd: Vec<String>,
    workdir: Option<String>,
    files: HashMap<String, Vec<u8>>,
    exit: Option<i64>,
}

#[derive(Debug, Default)]
struct FakeState {
    images: HashSet<String>,
    labels: HashMap<String, BTreeMap<String, String>>,
    containers: HashMap<String, FakeContainer>,
    builds: VecDeque<ScriptedRun>,
    clone_exit: i64,
    push_fails: bool,
    pushes: Vec<String>,
    next_id: u64,
}

/// An in-memory [`ContainerRunner`] with scripted Maven-build outcomes.
///
/// Build containers (commands invoking `mvn`) consume outcomes from the
/// script queue in order; the clone container exits with a configurable
/// code; every other container (image staging, metadata probes) succeeds
/// trivially and `du -s` answers a fixed size.
pub struct FakeRunner {
    state: Mutex<FakeState>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.images.insert(BASE_MAVEN_IMAGE.to_string());
        FakeRunner {
            state: Mutex::new(state),
        }
    }

    /// Appends outcomes for the next Maven build containers, in run order.
    pub fn script_builds(&self, runs: impl IntoIterator<Item = ScriptedRun>) {
        self.state.lock().builds.extend(runs);
    }

    /// Makes the clone-and-fetch container fail.
    pub fn fail_clone(&self) {
        self.state.lock().clone_exit = 128;
    }

    /// Makes registry pushes fail.
    pub fn fail_pushes(&self) {
        self.state.lock().push_fails = true;
    }

    pub fn image_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().images.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().images.contains(reference)
    }

    pub fn labels_of(&self, reference: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().labels.get(reference).cloned()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().pushes.clone()
    }

    /// Containers still alive; zero after a clean candidate.
    pub fn live_containers(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Unconsumed scripted builds; zero when a test consumed its script.
    pub fn remaining_builds(&self) -> usize {
        self.state.lock().builds.len()
    }
}

fn is_build_cmd(cmd: &[String]) -> bool {
    cmd.iter().any(|part| part.contains("mvn clean test"))
}

fn is_clone_cmd(cmd: &[String]) -> bool {
    cmd.iter().any(|part| part.contains("git clone"))
}

/// The log file path a build command tees into, resolved in the workdir.
fn log_path(cmd: &[String], workdir: Option<&str>) -> Option<String> {
    let script = cmd.iter().find(|part| part.contains("tee "))?;
    let file = script.split_whitespace().last()?;
    Some(format!("{}/{}", workdir.unwrap_or(""), file))
}

#[async_trait]
impl ContainerRunner for FakeRunner {
    async fn pull(&self, image: &str) -> Result<(), ContainerError> {
        self.state.lock().images.insert(image.to_string());
        Ok(())
    }

    async fn create(
        &self,
        image: &str,
        workdir: Option<&str>,
        cmd: &[&str],
    ) -> Result<String, ContainerError> {
        let mut state = self.state.lock();
        if !state.images.contains(image) {
            return Err(ContainerError::NotFound(format!("no such image: {image}")));
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: image.to_string(),
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                workdir: workdir.map(str::to_string),
                files: HashMap::new(),
                exit: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        let state = self.state.lock();
        if state.containers.contains_key(id) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(format!("no such container: {id}")))
        }
    }

    async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let mut state = self.state.lock();

        let (already_exited, is_build) = {
            let container = state
                .containers
                .get(id)
                .ok_or_else(|| ContainerError::NotFound(format!("no such container: {id}")))?;
            (container.exit, is_build_cmd(&container.cmd))
        };
        if let Some(exit) = already_exited {
            return Ok(exit);
        }

        let scripted = if is_build {
            Some(
                state
                    .builds
                    .pop_front()
                    .unwrap_or_else(|| panic!("no scripted outcome left for build container {id}")),
            )
        } else {
            None
        };

        let clone_exit = state.clone_exit;
        let container = state.containers.get_mut(id).expect("checked above");
        let exit = match scripted {
            Some(run) => {
                if let Some(path) = log_path(&container.cmd, container.workdir.as_deref()) {
                    container.files.insert(path, run.log.clone().into_bytes());
                }
                for (path, contents) in run.files {
                    container.files.insert(path, contents);
                }
                run.exit
            }
            None if is_clone_cmd(&container.cmd) => clone_exit,
            None => 0,
        };
        container.exit = Some(exit);
        Ok(exit)
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        let state = self.state.lock();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| ContainerError::NotFound(format!("no such container: {id}")))?;
        container
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(format!("no such container:path: {id}:{path}")))
    }

    async fn commit(
        &self,
        id: &str,
        reference: &str,
        options: &CommitOptions,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if !state.containers.contains_key(id) {
            return Err(ContainerError::NotFound(format!("no such container: {id}")));
        }
        state.images.insert(reference.to_string());
        if !options.labels.is_empty() {
            state
                .labels
                .insert(reference.to_string(), options.labels.clone());
        }
        Ok(())
    }

    async fn push(
        &self,
        repo: &str,
        tag: &str,
        _credentials: &RegistryCredentials,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.push_fails {
            return Err(ContainerError::Daemon("registry unavailable".to_string()));
        }
        let reference = format!("{repo}:{tag}");
        if !state.images.contains(&reference) {
            return Err(ContainerError::NotFound(format!("no such image: {reference}")));
        }
        state.pushes.push(reference);
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[&str]) -> Result<Vec<u8>, ContainerError> {
        let state = self.state.lock();
        if !state.containers.contains_key(id) {
            return Err(ContainerError::NotFound(format!("no such container: {id}")));
        }
        if cmd.first() == Some(&"du") {
            let path = cmd.last().copied().unwrap_or("");
            return Ok(format!("424242\t{path}\n").into_bytes());
        }
        Ok(Vec::new())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(format!("no such container: {id}")))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.images.remove(reference) {
            state.labels.remove(reference);
            Ok(())
        } else {
            Err(ContainerError::NotFound(format!("no such image: {reference}")))
        }
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, ContainerError> {
        Ok(self.state.lock().images.contains(reference))
    }
}
