//! Docker CLI implementation of the container runner.
//!
//! Talks to the local daemon through the `docker` binary via
//! `tokio::process`. Registry pushes log in with `--password-stdin` so the
//! identity token never appears in an argument list.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CommitOptions, ContainerError, ContainerRunner, RegistryCredentials};

/// Runner backed by the `docker` CLI against the local daemon.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        DockerCli
    }
}

/// Run a docker CLI command and return stdout on success.
async fn run_docker(args: &[&str]) -> Result<String, ContainerError> {
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| ContainerError::Daemon(format!("failed to exec docker: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if is_not_found(stderr) {
            Err(ContainerError::NotFound(stderr.to_string()))
        } else {
            Err(ContainerError::Daemon(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr
            )))
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such file or directory")
        || lower.contains("could not find the file")
        || lower.contains("no such container:path")
}

#[async_trait]
impl ContainerRunner for DockerCli {
    async fn pull(&self, image: &str) -> Result<(), ContainerError> {
        if self.image_exists(image).await? {
            return Ok(());
        }
        tracing::info!(image, "pulling base image");
        run_docker(&["pull", image]).await?;
        Ok(())
    }

    async fn create(
        &self,
        image: &str,
        workdir: Option<&str>,
        cmd: &[&str],
    ) -> Result<String, ContainerError> {
        let mut args = vec!["create"];
        if let Some(workdir) = workdir {
            args.extend_from_slice(&["-w", workdir]);
        }
        args.push(image);
        args.extend_from_slice(cmd);
        // `docker create` prints the new container id.
        run_docker(&args).await
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        run_docker(&["start", id]).await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let output = run_docker(&["wait", id]).await?;
        output
            .trim()
            .parse()
            .map_err(|e| ContainerError::Daemon(format!("unparseable exit code {output:?}: {e}")))
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        // `docker cp` extracts onto the host file system; stage through a
        // temp dir and read the file back.
        let staging = tempfile::tempdir()?;
        let file_name = path.rsplit('/').next().unwrap_or("out");
        let host_path = staging.path().join(file_name);
        let host_path_str = host_path.to_string_lossy().into_owned();

        run_docker(&["cp", &format!("{id}:{path}"), &host_path_str]).await?;
        Ok(std::fs::read(&host_path)?)
    }

    async fn commit(
        &self,
        id: &str,
        reference: &str,
        options: &CommitOptions,
    ) -> Result<(), ContainerError> {
        let mut changes = Vec::new();
        for (key, value) in &options.labels {
            changes.push(format!("LABEL {key}={value:?}"));
        }
        if let Some(cmd) = &options.cmd {
            changes.push(format!("CMD {cmd}"));
        }
        if let Some(workdir) = &options.workdir {
            changes.push(format!("WORKDIR {workdir}"));
        }

        let mut args = vec!["commit".to_string()];
        for change in changes {
            args.push("--change".to_string());
            args.push(change);
        }
        args.push(id.to_string());
        args.push(reference.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_docker(&arg_refs).await?;
        Ok(())
    }

    async fn push(
        &self,
        repo: &str,
        tag: &str,
        credentials: &RegistryCredentials,
    ) -> Result<(), ContainerError> {
        // The registry host is the first path segment of the repository.
        let registry = repo.split('/').next().unwrap_or(repo);

        let mut login = Command::new("docker")
            .args(["login", registry, "-u", credentials.user_name.as_str(), "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::Daemon(format!("failed to exec docker login: {e}")))?;
        if let Some(mut stdin) = login.stdin.take() {
            stdin
                .write_all(credentials.identity_token.as_bytes())
                .await?;
        }
        let status = login
            .wait_with_output()
            .await
            .map_err(|e| ContainerError::Daemon(format!("docker login did not finish: {e}")))?;
        if !status.status.success() {
            return Err(ContainerError::Daemon(format!(
                "docker login to {registry} failed: {}",
                String::from_utf8_lossy(&status.stderr).trim()
            )));
        }

        run_docker(&["push", &format!("{repo}:{tag}")]).await?;
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[&str]) -> Result<Vec<u8>, ContainerError> {
        let mut args = vec!["exec", id];
        args.extend_from_slice(cmd);
        Ok(run_docker(&args).await?.into_bytes())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        run_docker(&["rm", "-f", id]).await?;
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<(), ContainerError> {
        run_docker(&["rmi", reference]).await?;
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, ContainerError> {
        match run_docker(&["image", "inspect", reference]).await {
            Ok(_) => Ok(true),
            Err(ContainerError::NotFound(_)) => Ok(false),
            // `docker image inspect` reports a missing image on stderr
            // without a recognizable not-found phrase in some versions.
            Err(ContainerError::Daemon(message)) if message.contains("No such image") => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        assert!(is_not_found(
            "Error: No such container:path: abc123:/root/.m2/repository/x.jar"
        ));
        assert!(is_not_found("stat /x: no such file or directory"));
        assert!(!is_not_found("permission denied"));
    }
}
