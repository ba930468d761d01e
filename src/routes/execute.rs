use actix_web::{HttpRequest, HttpResponse, Responder, post, web};
use tokio::sync::oneshot;

use super::{AUTH_HEADER, ErrorResponse, ExecutionJob};
use crate::config::Config;
use crate::models::{SubmissionRequest, SubmissionResult, SubmissionStatus};
use crate::queue::JobQueue;

/// Accepts one submission, blocks until a worker has executed it and replies
/// with the full per-case report
#[post("/execute")]
pub async fn execute_handler(
    req: HttpRequest,
    config: web::Data<Config>,
    queue: web::Data<JobQueue>,
    body: web::Json<SubmissionRequest>,
) -> impl Responder {
    if let Some(secret) = config.server.auth_secret.as_deref() {
        let presented = req
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(secret) {
            return HttpResponse::Forbidden().json(ErrorResponse {
                reason: "ERR_WRONG_SECRET",
                code: 2,
            });
        }
    }

    let request = body.into_inner();

    if !config
        .languages
        .iter()
        .any(|language| language.name == request.language)
    {
        return HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_UNKNOWN_LANGUAGE",
            code: 3,
        });
    }

    // Nothing to run is a failed submission, not a reason to start a sandbox
    if request.inputs.is_empty() {
        return HttpResponse::Ok().json(SubmissionResult::aborted(
            SubmissionStatus::Failed,
            "no test cases supplied",
        ));
    }

    let (responder, verdict) = oneshot::channel();
    queue
        .push(ExecutionJob { request, responder })
        .await;
    log::debug!("submission queued");

    match verdict.await {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(e)) => {
            log::error!("submission failed on an infrastructure fault: {e:?}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
        Err(e) => {
            log::error!("worker dropped a submission responder: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
