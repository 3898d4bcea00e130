// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::database_ops::store::ProductStore;
use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use std::sync::Arc;

/// Shared store handle injected into handlers.
pub type StoreData = web::Data<Arc<dyn ProductStore>>;

/// Health check endpoint
pub async fn health_check(store: StoreData) -> Result<HttpResponse> {
    let database = match store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = ?e, "health check: store unreachable");
            "disconnected"
        }
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
    })))
}

/// Stored product count plus the time it was read
pub async fn store_status(store: StoreData) -> Result<HttpResponse> {
    match store.count().await {
        Ok(product_count) => Ok(HttpResponse::Ok().json(ApiResponse::success(StatusResponse {
            product_count,
            timestamp: Utc::now(),
        }))),
        Err(e) => {
            tracing::error!(error = ?e, "status: product count failed");
            Ok(HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error(format!("product count unavailable: {e:#}"))))
        }
    }
}
