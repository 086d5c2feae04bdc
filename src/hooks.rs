use actix_web::{
    http::{header, StatusCode},
    web, HttpResponse, ResponseError,
};
use tokio::sync::mpsc;

use crate::{github::Event, http::Webhook};

/// Deliveries waiting for the dispatcher. A full queue makes the webhook
/// handler wait instead of dropping the delivery.
pub const EVENT_QUEUE_CAPACITY: usize = 10;

const SERVER_NAME: &str = concat!("branch-deployer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Routes {
    pub webhook: String,
    pub ping: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("event dispatcher is not running")]
    DispatcherGone,
}

impl ResponseError for HookError {
    fn status_code(&self) -> StatusCode {
        match self {
            HookError::DispatcherGone => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, routes: &Routes) {
    cfg.service(
        web::resource(routes.ping.as_str())
            .route(web::get().to(ping))
            .default_service(web::to(not_found)),
    )
    .service(
        web::resource(routes.webhook.as_str())
            .route(web::post().to(webhook))
            .default_service(web::to(method_not_allowed)),
    );
}

pub async fn webhook(
    Webhook(event): Webhook,
    tx: web::Data<mpsc::Sender<Event>>,
) -> Result<HttpResponse, HookError> {
    tracing::info!(
        event = event.kind().as_str(),
        repo = event
            .repository()
            .and_then(|repo| repo.full_name.as_deref())
            .unwrap_or("-"),
        sender = event.sender().map(|user| user.login.as_str()).unwrap_or("-"),
        "Accepted webhook",
    );

    tx.send(event)
        .await
        .map_err(|_| HookError::DispatcherGone)?;

    Ok(HttpResponse::Ok()
        .insert_header((header::SERVER, SERVER_NAME))
        .content_type("application/json")
        .body("{}"))
}

pub async fn ping() -> &'static str {
    "OK"
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().body("Not Found")
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().body("Method Not Allowed")
}
