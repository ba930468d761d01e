use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::memory;

/// Backpressure bound for the two pipe drains feeding the collector
const STREAM_CHANNEL_CAPACITY: usize = 64;
const READ_CHUNK_BYTES: usize = 4096;

/// Everything observed about one finished or killed process
#[derive(Debug)]
pub struct ProcessReport {
    /// Exit code; `None` when the process died to a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock time from stdin close to exit
    pub elapsed: Duration,
    /// Highest resident set size seen by the sampler, 0 when not sampled
    pub peak_memory: u64,
    pub timed_out: bool,
}

impl ProcessReport {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a build step to completion, capturing both output streams
pub async fn run_to_exit(argv: &[String], cwd: &Path, deadline: Duration) -> Result<ProcessReport> {
    run_process(argv, cwd, None, deadline, None).await
}

/// Runs one test case: hands over stdin, samples memory, enforces the deadline
pub async fn run_case_process(
    argv: &[String],
    cwd: &Path,
    input: &str,
    deadline: Duration,
    sample_interval: Duration,
) -> Result<ProcessReport> {
    run_process(
        argv,
        cwd,
        Some(super::shape_case_input(input)),
        deadline,
        Some(sample_interval),
    )
    .await
}

async fn run_process(
    argv: &[String],
    cwd: &Path,
    stdin_payload: Option<Vec<u8>>,
    deadline: Duration,
    sampling: Option<Duration>,
) -> Result<ProcessReport> {
    let (program, args) = argv.split_first().context("empty command template")?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timeout sweep also reaches grandchildren
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;
    let pid = child
        .id()
        .context("spawned process exited before its pid was read")?;

    let stdout_pipe = child.stdout.take().context("child stdout was not piped")?;
    let stderr_pipe = child.stderr.take().context("child stderr was not piped")?;

    let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let stdout_drain = spawn_drain(StreamTag::Stdout, stdout_pipe, chunk_tx.clone());
    let stderr_drain = spawn_drain(StreamTag::Stderr, stderr_pipe, chunk_tx);
    let collector = spawn_collector(chunk_rx);

    let sampler_token = CancellationToken::new();
    let sampler = sampling.map(|interval| spawn_sampler(pid, interval, sampler_token.clone()));

    let stdin_pipe = match &stdin_payload {
        Some(_) => Some(child.stdin.take().context("child stdin was not piped")?),
        None => None,
    };

    // The deadline spans input hand-off and the wait; elapsed time is counted
    // from the moment stdin closed.
    let started_at = Instant::now();
    let mut stdin_closed_at = None;
    let waited = tokio::time::timeout(deadline, async {
        if let (Some(pipe), Some(payload)) = (stdin_pipe, stdin_payload) {
            feed_stdin(pipe, payload).await;
        }
        stdin_closed_at = Some(Instant::now());
        child.wait().await
    })
    .await;

    let finished_at = Instant::now();
    let (timed_out, exit_code) = match waited {
        Ok(status) => {
            let status = status.with_context(|| format!("failed to wait for {program}"))?;
            (false, status.code())
        }
        Err(_) => {
            let _ = child.start_kill();
            kill_process_group(pid);
            let status = child
                .wait()
                .await
                .with_context(|| format!("failed to reap {program} after timeout"))?;
            log::info!("{program} exceeded the {}ms deadline", deadline.as_millis());
            (true, status.code())
        }
    };
    let elapsed = finished_at - stdin_closed_at.unwrap_or(started_at);

    sampler_token.cancel();

    stdout_drain.await.context("stdout drain task panicked")?;
    stderr_drain.await.context("stderr drain task panicked")?;
    let (stdout, stderr) = collector.await.context("stream collector panicked")?;
    let peak_memory = match sampler {
        Some(handle) => handle.await.context("memory sampler panicked")?,
        None => 0,
    };

    Ok(ProcessReport {
        exit_code,
        stdout,
        stderr,
        elapsed,
        peak_memory,
        timed_out,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamTag {
    Stdout,
    Stderr,
}

/// Reads one pipe to EOF, forwarding tagged chunks to the collector
fn spawn_drain<R>(
    tag: StreamTag,
    mut pipe: R,
    chunks: mpsc::Sender<(StreamTag, Vec<u8>)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = [0u8; READ_CHUNK_BYTES];
        loop {
            match pipe.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    if chunks.send((tag, buffer[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("draining {tag:?} failed: {e}");
                    break;
                }
            }
        }
    })
}

/// Folds tagged chunks into the two capture buffers until both drains finish
fn spawn_collector(mut chunks: mpsc::Receiver<(StreamTag, Vec<u8>)>) -> JoinHandle<(String, String)> {
    tokio::spawn(async move {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some((tag, chunk)) = chunks.recv().await {
            match tag {
                StreamTag::Stdout => stdout.extend_from_slice(&chunk),
                StreamTag::Stderr => stderr.extend_from_slice(&chunk),
            }
        }
        (
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        )
    })
}

/// Polls resident memory on a fixed tick until cancelled, returning the peak
fn spawn_sampler(pid: u32, interval: Duration, token: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut peak = 0u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(resident) = memory::resident_bytes(pid).await {
                        peak = peak.max(resident);
                    }
                }
            }
        }
        peak
    })
}

/// Hands the case input to the child and closes the pipe so it sees EOF
///
/// A write error means the program stopped reading; its exit status tells the
/// rest of the story, so the error is only logged.
async fn feed_stdin(mut pipe: ChildStdin, payload: Vec<u8>) {
    if let Err(e) = pipe.write_all(&payload).await {
        log::debug!("case input was not fully consumed: {e}");
        return;
    }
    if let Err(e) = pipe.flush().await {
        log::debug!("case input flush failed: {e}");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if ret != 0 {
        log::warn!("killpg({pid}) failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
