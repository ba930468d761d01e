use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{LanguageConfig, LimitsConfig};
use crate::models::{CaseOutcome, CaseResult, Stage, StageOutcome};
use crate::workspace::Workspace;

use super::backend::SandboxBackend;
use super::process::{self, ProcessReport};
use super::{TIMEOUT_MARKER, compile_failure_reason, expand_template};

/// Runs submissions as plain host processes
///
/// Containment here is the workspace directory, the per-case deadline and the
/// fresh process group per case; the docker backend is the hardened option.
pub struct NativeBackend {
    language: LanguageConfig,
    limits: LimitsConfig,
}

impl NativeBackend {
    pub fn new(language: LanguageConfig, limits: LimitsConfig) -> Self {
        Self { language, limits }
    }

    /// Placeholder values shared by compile and run templates
    fn command_values(&self, workspace: &Workspace) -> (String, String) {
        let dir = workspace.dir().to_string_lossy().into_owned();
        let source = workspace
            .dir()
            .join(&self.language.file_name)
            .to_string_lossy()
            .into_owned();
        (dir, source)
    }
}

#[async_trait]
impl SandboxBackend for NativeBackend {
    async fn compile(&mut self, workspace: &Workspace) -> Result<StageOutcome> {
        let Some(template) = &self.language.compile_command else {
            // Interpreted language, nothing to build
            return Ok(StageOutcome::ok(Stage::Compile));
        };

        let (dir, source) = self.command_values(workspace);
        let mapping = HashMap::from([("%DIR%", dir.as_str()), ("%SOURCE%", source.as_str())]);
        let argv = expand_template(template, &mapping);

        let report = process::run_to_exit(
            &argv,
            workspace.dir(),
            self.limits.compile_timeout.duration(),
        )
        .await?;

        if report.timed_out {
            return Ok(StageOutcome::fail(
                Stage::Compile,
                "compiler did not finish in time",
            ));
        }
        if report.succeeded() {
            return Ok(StageOutcome::ok(Stage::Compile));
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

    async fn prepare_run(&mut self, _workspace: &Workspace) -> Result<StageOutcome> {
        // Each case spawns its own process group, there is nothing to warm up
        Ok(StageOutcome::ok(Stage::PrepareRun))
    }

    async fn run_case(&mut self, workspace: &Workspace, input: &str) -> Result<CaseResult> {
        let (dir, source) = self.command_values(workspace);
        let mapping = HashMap::from([("%DIR%", dir.as_str()), ("%SOURCE%", source.as_str())]);
        let argv = expand_template(&self.language.run_command, &mapping);

        let report = process::run_case_process(
            &argv,
            workspace.dir(),
            input,
            self.limits.case_timeout.duration(),
            self.limits.sample_interval.duration(),
        )
        .await?;

        Ok(case_result(report))
    }

    async fn cleanup(&mut self) {
        // Case processes are reaped by the runner and the workspace belongs
        // to the store, so there is nothing left to release
        log::debug!("native sandbox for {} released", self.language.name);
    }
}

fn case_result(report: ProcessReport) -> CaseResult {
    let time = report.elapsed_ms();
    let memory = report.peak_memory;
    if report.timed_out {
        CaseResult {
            output: TIMEOUT_MARKER.to_string(),
            time,
            memory,
            outcome: CaseOutcome::Timeout,
        }
    } else if report.succeeded() {
        CaseResult {
            output: report.stdout,
            time,
            memory,
            outcome: CaseOutcome::Success,
        }
    } else {
        // Crash output is worth more to the caller than an empty stdout
        CaseResult {
            output: report.stderr,
            time,
            memory,
            outcome: CaseOutcome::RuntimeError,
        }
    }
}
