use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
    StatsOptions,
};
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{LanguageConfig, LimitsConfig};
use crate::models::{CaseOutcome, CaseResult, Stage, StageOutcome};
use crate::workspace::Workspace;

use super::backend::SandboxBackend;
use super::{TIMEOUT_MARKER, compile_failure_reason, expand_line, shape_case_input};

/// Syscall policy applied to every sandbox container, overridable per config
const DEFAULT_SECCOMP_POLICY: &str = include_str!("../../policy/seccomp.json");

/// Workspace mount point inside the container
const GUEST_WORKSPACE_DIR: &str = "/app";
/// Guest path of the staged per-case input file
const GUEST_INPUT_PATH: &str = "/app/input.txt";

/// Process-wide Docker client, connected once
fn shared_client() -> Result<Docker> {
    static CLIENT: OnceLock<Docker> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| anyhow!("failed to connect to the container runtime: {e}"))?;
    Ok(CLIENT.get_or_init(|| docker).clone())
}

/// Whether a container runtime answers right now
pub(crate) async fn daemon_available() -> bool {
    match shared_client() {
        Ok(docker) => docker.ping().await.is_ok(),
        Err(_) => false,
    }
}

fn pulled_images() -> &'static RwLock<HashSet<String>> {
    static PULLED: OnceLock<RwLock<HashSet<String>>> = OnceLock::new();
    PULLED.get_or_init(|| RwLock::new(HashSet::new()))
}

fn pull_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Makes sure `image` exists locally, pulling it at most once per process
///
/// The lock is held across the whole check-and-pull so concurrent first
/// submissions for the same language cannot trigger parallel pulls.
async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    if pulled_images().read().contains(image) {
        return Ok(());
    }

    let _guard = pull_lock().lock().await;
    if pulled_images().read().contains(image) {
        return Ok(());
    }

    if docker.inspect_image(image).await.is_err() {
        log::info!("Pulling image {image}");
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };
        let mut pull = docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress.map_err(|e| anyhow!("failed to pull image {image}: {e}"))?;
        }
        log::info!("Image {image} pulled");
    }

    pulled_images().write().insert(image.to_string());
    Ok(())
}

/// Everything observed about one exec inside a sandbox container
#[derive(Debug)]
struct ExecReport {
    exit_code: Option<i64>,
    stdout: String,
    stderr: String,
    elapsed: Duration,
    timed_out: bool,
}

/// Drives one submission's container through the Docker Engine API
struct ContainerOrchestrator {
    docker: Docker,
    limits: LimitsConfig,
    seccomp_policy: String,
}

impl ContainerOrchestrator {
    fn new(limits: LimitsConfig, seccomp_policy: Option<String>) -> Result<Self> {
        Ok(Self {
            docker: shared_client()?,
            limits,
            seccomp_policy: seccomp_policy.unwrap_or_else(|| DEFAULT_SECCOMP_POLICY.to_string()),
        })
    }

    /// Creates and starts the sandbox container: workspace bind-mounted at
    /// /app, network off, rootfs read-only, memory capped with swap disabled,
    /// kept alive by the image's interactive shell
    async fn create_sandbox(&self, image: &str, workspace: &Workspace) -> Result<String> {
        ensure_image(&self.docker, image).await?;

        let memory_cap = self.limits.memory_limit.0 as i64;
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                workspace.dir().display(),
                GUEST_WORKSPACE_DIR
            )]),
            memory: Some(memory_cap),
            // Equal totals leave the container no swap headroom
            memory_swap: Some(memory_cap),
            readonly_rootfs: Some(true),
            security_opt: Some(vec![format!("seccomp={}", self.seccomp_policy)]),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            host_config: Some(host_config),
            network_disabled: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            tty: Some(true),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(format!("codebox-{}", workspace.id())),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| anyhow!("failed to create container from {image}: {e}"))?;
        self.docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| anyhow!("failed to start container {}: {e}", container.id))?;
        Ok(container.id)
    }

    /// Runs one command in the container and drains its output until exit or
    /// deadline
    ///
    /// Docker offers no exec kill, so a deadline overrun only detaches from
    /// the stream; whatever keeps running dies with the container in cleanup.
    async fn exec_once(
        &self,
        container_id: &str,
        command: &str,
        deadline: Duration,
    ) -> Result<ExecReport> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow!("failed to create exec in {container_id}: {e}"))?;

        let started = Instant::now();
        let attached = self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| anyhow!("failed to start exec {}: {e}", exec.id))?;
        let StartExecResults::Attached { mut output, .. } = attached else {
            bail!("exec {} unexpectedly started detached", exec.id);
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        let drained = tokio::time::timeout(deadline, async {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("exec output stream for {container_id} broke: {e}");
                        break;
                    }
                }
            }
        })
        .await;
        let elapsed = started.elapsed();
        let timed_out = drained.is_err();

        let exit_code = if timed_out {
            log::info!(
                "exec in {container_id} exceeded the {}ms deadline",
                deadline.as_millis()
            );
            None
        } else {
            self.docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| anyhow!("failed to inspect exec {}: {e}", exec.id))?
                .exit_code
        };

        Ok(ExecReport {
            exit_code,
            stdout,
            stderr,
            elapsed,
            timed_out,
        })
    }

    /// Follows the stats stream, folding memory usage into a peak until
    /// cancelled
    fn spawn_peak_memory(&self, container_id: String, token: CancellationToken) -> JoinHandle<u64> {
        let docker = self.docker.clone();
        tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                ..Default::default()
            };
            let mut stats = docker.stats(&container_id, Some(options));
            let mut peak = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    sample = stats.next() => match sample {
                        Some(Ok(snapshot)) => {
                            if let Some(usage) = snapshot.memory_stats.and_then(|m| m.usage) {
                                peak = peak.max(usage);
                            }
                        }
                        Some(Err(e)) => {
                            log::debug!("stats stream for {container_id} ended: {e}");
                            break;
                        }
                        None => break,
                    },
                }
            }
            peak
        })
    }

    /// Force-removes the container; problems are logged, never raised
    async fn remove_sandbox(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => log::info!("container {container_id} removed"),
            Err(e) => log::error!("failed to remove container {container_id}: {e}"),
        }
    }
}

/// Containerized [`SandboxBackend`], one container per submission
pub struct DockerBackend {
    orchestrator: ContainerOrchestrator,
    language: LanguageConfig,
    image: String,
    run_template: String,
    container_id: Option<String>,
}

impl DockerBackend {
    pub fn new(
        language: LanguageConfig,
        limits: LimitsConfig,
        seccomp_policy: Option<String>,
    ) -> Result<Self> {
        let image = language
            .image
            .clone()
            .ok_or_else(|| anyhow!("language {} has no container image configured", language.name))?;
        let run_template = language.container_run_command.clone().ok_or_else(|| {
            anyhow!("language {} has no container run command configured", language.name)
        })?;
        let orchestrator = ContainerOrchestrator::new(limits, seccomp_policy)?;
        Ok(Self {
            orchestrator,
            language,
            image,
            run_template,
            container_id: None,
        })
    }
}

/// Shell line executed for one case: expanded run command, stdin redirected
/// from the staged input file
fn case_command(run_template: &str) -> String {
    let run_line = expand_line(run_template, &guest_mapping());
    format!("{run_line} < {GUEST_INPUT_PATH}")
}

fn guest_mapping() -> HashMap<&'static str, &'static str> {
    HashMap::from([("%GUEST_DIR%", GUEST_WORKSPACE_DIR), ("%INPUT%", GUEST_INPUT_PATH)])
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    async fn compile(&mut self, _workspace: &Workspace) -> Result<StageOutcome> {
        // The source builds inside the container, which prepare_run brings
        // up; a compiler rejection there still comes back tagged as Compile
        Ok(StageOutcome::ok(Stage::Compile))
    }

    async fn prepare_run(&mut self, workspace: &Workspace) -> Result<StageOutcome> {
        let container_id = match self
            .orchestrator
            .create_sandbox(&self.image, workspace)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                log::error!("sandbox creation for workspace {} failed: {e}", workspace.id());
                return Ok(StageOutcome::fail(
                    Stage::PrepareRun,
                    format!("sandbox could not be created: {e}"),
                ));
            }
        };
        log::info!(
            "container {container_id} ready for workspace {}",
            workspace.id()
        );
        self.container_id = Some(container_id.clone());

        let Some(template) = &self.language.container_compile_command else {
            return Ok(StageOutcome::ok(Stage::PrepareRun));
        };
        let command = expand_line(template, &guest_mapping());
        let report = self
            .orchestrator
            .exec_once(
                &container_id,
                &command,
                self.orchestrator.limits.compile_timeout.duration(),
            )
            .await?;

        if report.timed_out {
            return Ok(StageOutcome::fail(
                Stage::Compile,
                "compiler did not finish in time",
            ));
        }
        if report.exit_code == Some(0) {
            return Ok(StageOutcome::ok(Stage::PrepareRun));
        }
        Ok(StageOutcome::fail(
            Stage::Compile,
            compile_failure_reason(
                &report.stderr,
                &report.stdout,
                self.language.diagnostic_anchor(),
            ),
        ))
    }

    async fn run_case(&mut self, workspace: &Workspace, input: &str) -> Result<CaseResult> {
        let Some(container_id) = self.container_id.clone() else {
            bail!("run_case called before the sandbox was prepared");
        };

        fs::write(workspace.case_input_path(), shape_case_input(input))
            .with_context(|| format!("failed to stage case input in {}", workspace.id()))?;

        let token = CancellationToken::new();
        let peak_task = self
            .orchestrator
            .spawn_peak_memory(container_id.clone(), token.clone());

        let report = self
            .orchestrator
            .exec_once(
                &container_id,
                &case_command(&self.run_template),
                self.orchestrator.limits.case_timeout.duration(),
            )
            .await;

        token.cancel();
        let memory = match peak_task.await {
            Ok(peak) => peak,
            Err(e) => {
                log::warn!("memory stats task for {container_id} failed: {e}");
                0
            }
        };

        let report = report?;
        Ok(container_case_result(report, memory))
    }

    async fn cleanup(&mut self) {
        if let Some(container_id) = self.container_id.take() {
            self.orchestrator.remove_sandbox(&container_id).await;
        }
    }
}

fn container_case_result(report: ExecReport, memory: u64) -> CaseResult {
    let time = report.elapsed.as_millis() as u64;
    if report.timed_out {
        return CaseResult {
            output: TIMEOUT_MARKER.to_string(),
            time,
            memory,
            outcome: CaseOutcome::Timeout,
        };
    }
    if report.exit_code == Some(0) {
        return CaseResult {
            output: report.stdout,
            time,
            memory,
            outcome: CaseOutcome::Success,
        };
    }
    let output = if report.stderr.is_empty() {
        report.stdout
    } else {
        report.stderr
    };
    CaseResult {
        output,
        time,
        memory,
        outcome: CaseOutcome::RuntimeError,
    }
}
