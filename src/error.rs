use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::ApiResponse;

/// Message returned to clients for any storage or internal failure.
pub const GENERIC_FAILURE: &str = "An error occurred, please try again";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not Found")]
    NotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order total must be greater than 0")]
    ZeroTotal,

    #[error("No valid items in cart")]
    NoValidItems,

    #[error("Quantity must be greater than 0")]
    InvalidQuantity,

    #[error("Invalid order status")]
    InvalidStatus,

    #[error("Cart could not be fully cleared, {remaining} item(s) remain")]
    IncompleteClear { remaining: u64 },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "Unauthenticated",
            AppError::Forbidden => "Forbidden",
            AppError::NotFound => "NotFound",
            AppError::EmptyCart => "EmptyCart",
            AppError::ZeroTotal => "ZeroTotal",
            AppError::NoValidItems => "NoValidItems",
            AppError::InvalidQuantity => "InvalidQuantity",
            AppError::InvalidStatus => "InvalidStatus",
            AppError::IncompleteClear { .. } => "IncompleteClear",
            AppError::BadRequest(_) => "BadRequest",
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                "StorageError"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::EmptyCart
            | AppError::ZeroTotal
            | AppError::NoValidItems
            | AppError::InvalidQuantity
            | AppError::InvalidStatus
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::IncompleteClear { .. } => StatusCode::CONFLICT,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text safe to show to a client; storage details never leave the server.
    pub fn public_message(&self) -> String {
        match self {
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                GENERIC_FAILURE.to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::DbError(err) => tracing::error!(error = %err, "database error"),
            AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
            AppError::Internal(err) => tracing::error!(error = ?err, "internal error"),
            _ => {}
        }

        let body = ApiResponse::failure(
            self.public_message(),
            Some(ErrorData { error: self.code() }),
        );

        (self.status(), axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
