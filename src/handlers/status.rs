// Health check and the error page endpoint
use actix_web::{web, HttpResponse, Result};
use serde::{Deserialize, Serialize};

use crate::utils::responses::ResponseBuilder;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    message: String,
}

/// Health check endpoint
///
/// # Errors
///
/// Never fails.
pub async fn health() -> Result<HttpResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        message: "idgate is running".to_string(),
    };
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Deserialize)]
pub struct ErrorPageQuery {
    #[serde(rename = "Error")]
    pub error: Option<String>,
    #[serde(rename = "Error_description")]
    pub error_description: Option<String>,
    #[serde(rename = "Error_hint")]
    pub error_hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorPageResponse {
    error: String,
    error_description: String,
    error_hint: String,
}

/// Target of failed browser flows. Echoes the error parameters as JSON.
///
/// # Errors
///
/// Never fails.
pub async fn error_page(query: web::Query<ErrorPageQuery>) -> Result<HttpResponse> {
    let query = query.into_inner();
    Ok(ResponseBuilder::ok_json(&ErrorPageResponse {
        error: query.error.unwrap_or_else(|| "unknown_error".to_string()),
        error_description: query.error_description.unwrap_or_default(),
        error_hint: query.error_hint.unwrap_or_default(),
    }))
}
