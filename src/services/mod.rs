//! Google Cloud clients used to turn chat messages into narration audio.

pub mod translator;
pub mod tts;

use std::time::Duration;

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("El texto está vacío")]
    EmptyText,
    #[error("Error HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Google API error: {status} - {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Respuesta inválida: {0}")]
    InvalidResponse(String),
    #[error("Audio inválido: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Convierte una respuesta no exitosa en `ServiceError::Api`
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Api { status, body })
}
