use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CaseResult, StageOutcome};
use crate::workspace::Workspace;

/// Common interface for the execution backends
///
/// One instance serves exactly one submission. The pipeline calls the methods
/// in `compile`, `prepare_run`, `run_case` (repeated), `cleanup` order and the
/// instance owns whatever state those stages create, typically a container or
/// nothing at all. An `Err` from any method is an infrastructure fault; the
/// expected failures of a stage travel inside the returned [`StageOutcome`].
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Builds the saved source, reporting compiler diagnostics on rejection
    ///
    /// Backends that compile inside their run environment may defer the work
    /// to `prepare_run` and answer with a trivially successful outcome here.
    async fn compile(&mut self, workspace: &Workspace) -> Result<StageOutcome>;

    /// Makes the sandbox ready to execute test cases
    async fn prepare_run(&mut self, workspace: &Workspace) -> Result<StageOutcome>;

    /// Runs one test case to completion or deadline and records what happened
    ///
    /// Case trouble (non-zero exit, timeout) is data in the returned
    /// [`CaseResult`], never an `Err`.
    async fn run_case(&mut self, workspace: &Workspace, input: &str) -> Result<CaseResult>;

    /// Releases everything the backend created; must be safe to call on any
    /// partially prepared state and must never fail, only log
    async fn cleanup(&mut self);
}
