use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Everything needed to launch one plugin container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, used for out-of-band kills.
    pub name: String,
    pub image: String,
    pub argv: Vec<String>,
    /// Host directory mounted as the container's working directory. The
    /// declared inputs are staged here and outputs are collected from here.
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContainerExit {
    pub code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl ContainerExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// The container runtime capability: spawn-and-wait plus kill.
///
/// The worker only ever talks to the runtime through this trait, so tests
/// substitute an in-process fake that runs plugin logic directly.
pub trait ContainerRuntime: Send + Sync + 'static {
    fn run(&self, spec: ContainerSpec) -> impl Future<Output = Result<ContainerExit>> + Send;

    fn kill(&self, name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Sibling-container runtime over the host's `docker` CLI.
///
/// The container is a peer of the worker (Docker-outside-of-Docker): the
/// worker mounts the task scratch directory read-write and waits for exit.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: ContainerSpec) -> Result<ContainerExit> {
        let mount = spec
            .scratch_dir
            .canonicalize()
            .with_context(|| format!("scratch dir {:?}", spec.scratch_dir))?;

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={}", spec.name),
            "-v".to_string(),
            format!("{}:/work", mount.display()),
            "-w".to_string(),
            "/work".to_string(),
            spec.image.clone(),
        ];
        args.extend(spec.argv.iter().cloned());

        tracing::info!(
            "Spawning container {} (image {}, {} args)",
            spec.name,
            spec.image,
            spec.argv.len()
        );

        let output = Command::new("docker")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to invoke docker")?;

        let exit = ContainerExit {
            code: output.status.code().unwrap_or(-1),
            stdout_tail: tail_of(&String::from_utf8_lossy(&output.stdout)),
            stderr_tail: tail_of(&String::from_utf8_lossy(&output.stderr)),
        };

        tracing::info!("Container {} exited with code {}", spec.name, exit.code);
        Ok(exit)
    }

    async fn kill(&self, name: &str) -> Result<()> {
        let status = Command::new("docker")
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("failed to invoke docker kill")?;

        if !status.success() {
            tracing::warn!("docker kill {} exited with {:?}", name, status.code());
        }
        Ok(())
    }
}


const TAIL_BYTES: usize = 2048;

/// Last chunk of a captured stream, enough for failure reports.
pub fn tail_of(text: &str) -> String {
    if text.len() <= TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
