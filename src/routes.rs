mod execute;
mod status;

pub use execute::*;
pub use status::*;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::models::{SubmissionRequest, SubmissionResult};

/// Header carrying the shared secret on authenticated deployments
pub const AUTH_HEADER: &str = "auth";

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

/// One queued submission plus the channel its verdict travels back on
///
/// An `Err` through the responder is an infrastructure fault; expected
/// failures arrive as a [`SubmissionResult`] with a failed status.
pub struct ExecutionJob {
    pub request: SubmissionRequest,
    pub responder: oneshot::Sender<anyhow::Result<SubmissionResult>>,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}
