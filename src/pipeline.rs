use anyhow::Result;

use crate::aggregate;
use crate::config::LanguageConfig;
use crate::models::{Stage, StageOutcome, SubmissionRequest, SubmissionResult, SubmissionStatus};
use crate::sandbox::SandboxBackend;
use crate::security::SecurityScanner;
use crate::workspace::{Workspace, WorkspaceStore};

/// Message attached to submissions the security scan rejects
pub const SECURITY_REJECTION: &str = "dangerous or sensitive code";

/// Drives one submission through scan, save, compile, prepare and run
///
/// The stage order is fixed and any failed stage stops forward progress, but
/// the release step always runs: backend cleanup first, then workspace
/// removal, exactly once per submission on success, abort and fault paths
/// alike.
pub struct ExecutionPipeline<'a> {
    scanner: &'a SecurityScanner,
    store: &'a WorkspaceStore,
    language: &'a LanguageConfig,
    backend: Box<dyn SandboxBackend>,
    workspace: Option<Workspace>,
}

impl<'a> ExecutionPipeline<'a> {
    pub fn new(
        scanner: &'a SecurityScanner,
        store: &'a WorkspaceStore,
        language: &'a LanguageConfig,
        backend: Box<dyn SandboxBackend>,
    ) -> Self {
        Self {
            scanner,
            store,
            language,
            backend,
            workspace: None,
        }
    }

    pub async fn run(mut self, request: &SubmissionRequest) -> Result<SubmissionResult> {
        let verdict = self.advance(request).await;
        self.release().await;
        verdict
    }

    async fn advance(&mut self, request: &SubmissionRequest) -> Result<SubmissionResult> {
        // 1. Scan the source before anything touches the filesystem
        if let Some(token) = self.scanner.scan(&request.source_code) {
            log::info!("submission rejected by the security scan (token {token:?})");
            return Ok(SubmissionResult::aborted(
                SubmissionStatus::Failed,
                SECURITY_REJECTION,
            ));
        }

        // 2. Save the source into a fresh workspace
        let workspace = self
            .workspace
            .insert(self.store.create(&request.language)?);
        let source_path =
            self.store
                .write_source(workspace, &self.language.file_name, &request.source_code)?;
        log::debug!("source saved to {}", source_path.display());

        // 3. Compile
        let compiled = self.backend.compile(workspace).await?;
        if !compiled.success {
            log::info!("compile stage rejected workspace {}", workspace.id());
            return Ok(aborted_result(compiled));
        }

        // 4. Prepare the run environment
        let prepared = self.backend.prepare_run(workspace).await?;
        if !prepared.success {
            log::info!("prepare stage failed for workspace {}", workspace.id());
            return Ok(aborted_result(prepared));
        }

        // 5. Run every case in submission order
        let mut cases = Vec::with_capacity(request.inputs.len());
        for (index, input) in request.inputs.iter().enumerate() {
            let case = self.backend.run_case(workspace, input).await?;
            log::debug!("case {index} finished with {:?}", case.outcome);
            cases.push(case);
        }

        Ok(aggregate::finalize(cases))
    }

    /// Backend resources go first, then the workspace directory they may
    /// still be mounted on
    async fn release(&mut self) {
        self.backend.cleanup().await;
        if let Some(workspace) = self.workspace.take() {
            self.store.destroy(workspace);
        }
    }
}

fn aborted_result(outcome: StageOutcome) -> SubmissionResult {
    let status = match outcome.stage {
        Stage::Compile => SubmissionStatus::CompileFailed,
        _ => SubmissionStatus::Failed,
    };
    SubmissionResult::aborted(status, outcome.reason)
}
