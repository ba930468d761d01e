use serde::{Deserialize, Serialize};

/// One submission: source text, the language to build it with, one stdin blob per test case
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionRequest {
    pub source_code: String,
    pub language: String,
    pub inputs: Vec<String>,
}

/// Submission-level verdict
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Every stage ran; individual cases may still have failed
    Success,
    /// Execution was aborted before the run loop, or there was nothing to run
    Failed,
    /// The compiler rejected the source
    CompileFailed,
}

/// How a single test case ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Success,
    RuntimeError,
    Timeout,
}

/// Measurements and output captured for one test case
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaseResult {
    /// Normalized stdout, or stderr for a runtime error, or the timeout marker
    pub output: String,
    /// Wall-clock milliseconds from input hand-off to process exit
    pub time: u64,
    /// Peak resident memory observed while the case ran, in bytes
    pub memory: u64,
    pub outcome: CaseOutcome,
}

/// Full response for one submission
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    pub message: String,
    /// Case outputs in input order; outputs[i] equals cases[i].output
    pub outputs: Vec<String>,
    pub cases: Vec<CaseResult>,
}

impl SubmissionResult {
    /// Result for a submission that never reached the run loop
    pub fn aborted(status: SubmissionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            outputs: Vec::new(),
            cases: Vec::new(),
        }
    }
}

/// Pipeline stage a [`StageOutcome`] speaks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreCheck,
    Compile,
    PrepareRun,
    Run,
}

/// Verdict of one pipeline stage
///
/// A failed outcome is expected-failure data (the submission aborts with a
/// message), not an error; infrastructure trouble travels as `anyhow::Error`.
/// Backends may tag an outcome with a stage other than the method it came
/// from, e.g. a containerized compile that only happens during run preparation
/// still reports compiler rejections under [`Stage::Compile`].
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub success: bool,
    pub reason: String,
}

impl StageOutcome {
    pub fn ok(stage: Stage) -> Self {
        Self {
            stage,
            success: true,
            reason: String::new(),
        }
    }

    pub fn fail(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            success: false,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn statuses_serialize_snake_case() {
        let json = serde_json::to_string(&SubmissionStatus::CompileFailed).unwrap();
        assert_eq!(json, r#""compile_failed""#);
        let json = serde_json::to_string(&CaseOutcome::RuntimeError).unwrap();
        assert_eq!(json, r#""runtime_error""#);
    }

    #[test]
    fn aborted_result_has_no_case_data() {
        let result = SubmissionResult::aborted(SubmissionStatus::Failed, "nope");
        assert_eq!(result.status, SubmissionStatus::Failed);
        assert_eq!(result.message, "nope");
        assert!(result.outputs.is_empty());
        assert!(result.cases.is_empty());
    }

    #[test]
    fn stage_outcome_constructors() {
        let ok = StageOutcome::ok(Stage::Compile);
        assert!(ok.success);
        assert!(ok.reason.is_empty());

        let fail = StageOutcome::fail(Stage::PrepareRun, "no runtime");
        assert!(!fail.success);
        assert_eq!(fail.stage, Stage::PrepareRun);
        assert_eq!(fail.reason, "no runtime");
    }
}
