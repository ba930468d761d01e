use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

/// Liveness payload, fixed at server construction
#[derive(Serialize, Clone)]
pub struct ServiceStatus {
    pub service: &'static str,
    pub state: &'static str,
    pub started_at: String,
}

impl ServiceStatus {
    pub fn now() -> Self {
        Self {
            service: "codebox",
            state: "ok",
            started_at: crate::create_timestamp(),
        }
    }
}

#[get("/status")]
pub async fn status_handler(status: web::Data<ServiceStatus>) -> impl Responder {
    HttpResponse::Ok().json(status.get_ref())
}
