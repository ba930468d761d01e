use crate::models::{CaseOutcome, CaseResult, SubmissionResult, SubmissionStatus};

/// Unifies line endings and strips trailing newlines from captured output
pub fn normalize_output(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim_end_matches('\n').to_string()
}

/// Builds the response for a submission whose run loop completed
///
/// Case failures are data here: the submission status stays `success` even
/// when cases timed out or crashed, and the message counts them.
pub fn finalize(mut cases: Vec<CaseResult>) -> SubmissionResult {
    for case in &mut cases {
        case.output = normalize_output(&case.output);
    }
    let failed = cases
        .iter()
        .filter(|case| case.outcome != CaseOutcome::Success)
        .count();
    let message = if failed == 0 {
        "all cases finished".to_string()
    } else {
        format!("{failed} of {} cases failed", cases.len())
    };
    let outputs = cases.iter().map(|case| case.output.clone()).collect();
    SubmissionResult {
        status: SubmissionStatus::Success,
        message,
        outputs,
        cases,
    }
}
