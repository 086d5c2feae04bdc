use actix_web::{
    dev::Payload, error::ResponseError, http::StatusCode, web::Bytes, FromRequest, HttpRequest,
};
use futures::future::LocalBoxFuture;
use secstr::SecUtf8;

use crate::{
    github::{Event, EventKind},
    signature::{self, Signature},
};

pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// A webhook delivery that passed signature verification and was decoded
/// into the payload matching its `X-GitHub-Event` kind.
#[derive(Debug, Clone)]
pub struct Webhook(pub Event);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Bad Request - Missing X-GitHub-Event Header")]
    MissingEventHeader,
    #[error("Forbidden - Missing X-Hub-Signature")]
    MissingSignature,
    #[error("Forbidden - X-Hub-Signature verification failed")]
    InvalidSignature,
    #[error("HMAC key has invalid length")]
    HmacInvalidLength,
    #[error("Not Implemented - Unknown event type {0}")]
    UnknownEvent(String),
    #[error("failed reading request data: {0}")]
    ActixError(#[from] actix_web::Error),
    // The decoder's message goes back to the sender as is.
    #[error("{0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<signature::Error> for WebhookError {
    fn from(err: signature::Error) -> Self {
        match err {
            signature::Error::HeaderNotFound => Self::MissingSignature,
            signature::Error::InvalidLength
            | signature::Error::InvalidPrefix
            | signature::Error::NotHex => Self::InvalidSignature,
            signature::Error::HmacInvalidLength => Self::HmacInvalidLength,
        }
    }
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingEventHeader => StatusCode::BAD_REQUEST,
            WebhookError::MissingSignature => StatusCode::FORBIDDEN,
            WebhookError::InvalidSignature => StatusCode::FORBIDDEN,
            WebhookError::HmacInvalidLength => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::UnknownEvent(_) => StatusCode::NOT_IMPLEMENTED,
            WebhookError::ActixError(err) => err.as_response_error().status_code(),
            WebhookError::JsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shared secret for `X-Hub-Signature`. Without one every delivery is
/// accepted unsigned.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub key: Option<SecUtf8>,
}

impl WebhookConfig {
    pub fn new(key: Option<SecUtf8>) -> Self {
        Self {
            key: key.filter(|key| !key.unsecure().is_empty()),
        }
    }
}

impl FromRequest for Webhook {
    type Error = WebhookError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let body = Bytes::from_request(&req, payload);

        Box::pin(async move {
            let event_type = req
                .headers()
                .get(EVENT_HEADER)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .filter(|value| !value.is_empty())
                .ok_or(WebhookError::MissingEventHeader)?;

            let bytes = body.await?;

            let default_config = WebhookConfig::default();
            let config = req
                .app_data::<WebhookConfig>()
                .unwrap_or(&default_config);
            if let Some(key) = &config.key {
                let signature = Signature::from_headers(req.headers())?;
                if !signature.verify(key.unsecure().as_bytes(), &bytes)? {
                    tracing::warn!(event = event_type.as_str(), "Rejected webhook with bad signature");
                    return Err(WebhookError::InvalidSignature);
                }
            }

            let kind = EventKind::from_header(&event_type)
                .ok_or(WebhookError::UnknownEvent(event_type))?;
            let event = kind.parse(&bytes).map_err(|err| {
                tracing::error!(event = kind.as_str(), "Failed to decode webhook body: {}", err);
                err
            })?;

            Ok(Self(event))
        })
    }
}
