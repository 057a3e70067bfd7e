//! The user-facing JSON web server. Routes translate HTTP requests into
//! gateway calls and gateway errors into HTTP responses

use crate::config::CAMERA_UNAVAILABLE;
use crate::gateway::{Error, Gateway};
use actix_multipart::MultipartError;
use actix_web::error::{BlockingError, JsonPayloadError};
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use tracing::error;

pub mod protocol;
pub mod routes;

#[derive(Debug)]
pub struct WebError {
    err: Error,
}

impl WebError {
    pub fn inner(&self) -> &Error {
        &self.err
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let body = match &self.err {
            Error::CameraUnavailable => HashMap::from([("message", CAMERA_UNAVAILABLE.to_string())]),
            err if err.is_client_error() => HashMap::from([("error", err.to_string())]),
            err => {
                error!("request failed: {err:#}");
                HashMap::from([("error", "internal server error".to_string())])
            }
        };

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self.err {
            Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ref err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for WebError {
    fn from(err: Error) -> WebError {
        WebError { err }
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError {
            err: Error::Internal(err),
        }
    }
}

impl From<BlockingError> for WebError {
    fn from(err: BlockingError) -> WebError {
        WebError {
            err: Error::Internal(anyhow::anyhow!("blocking task failed: {err}")),
        }
    }
}

impl From<MultipartError> for WebError {
    fn from(err: MultipartError) -> Self {
        WebError {
            err: Error::BadRequest(err.to_string()),
        }
    }
}

impl From<JsonPayloadError> for WebError {
    fn from(err: JsonPayloadError) -> Self {
        let err = match err {
            JsonPayloadError::OverflowKnownLength { limit, .. } | JsonPayloadError::Overflow { limit } => {
                Error::TooLarge(limit)
            }
            err => Error::BadRequest(err.to_string()),
        };
        WebError { err }
    }
}

/// HTTP-level limits and paths shared by the routes
#[derive(Debug, Clone)]
pub struct Limits {
    /// Largest accepted upload or JSON body, in bytes
    pub max_upload_bytes: usize,

    /// URL prefix persisted artifacts are served under
    pub public_prefix: String,
}

/// Register the gateway, its limits and all routes on an app
pub fn configure(gateway: web::Data<Gateway>, limits: Limits) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let artifacts = format!("/{}/{{name}}", limits.public_prefix.trim_matches('/'));
        let json = web::JsonConfig::default()
            .limit(limits.max_upload_bytes)
            .error_handler(|err, _req| WebError::from(err).into());

        cfg.app_data(gateway)
            .app_data(json)
            .app_data(web::Data::new(limits))
            .service(routes::detect_image)
            .service(routes::detect_video)
            .service(routes::detect_camera)
            .service(routes::detect_live_camera)
            .service(web::resource(artifacts).route(web::get().to(routes::artifact)));
    }
}
