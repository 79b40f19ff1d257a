use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query,
    },
    http::StatusCode,
    Json,
};
use booking::ApiContext;
use shared::error::{ApiError, ErrorCode};

use crate::auth::TokenConfig;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) tokens: TokenConfig,
}

pub(crate) type HttpError = (StatusCode, Json<ApiError>);

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InsufficientCapacity | ErrorCode::SeatAlreadyTaken | ErrorCode::Conflict => {
            StatusCode::CONFLICT
        }
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

/// Unwraps a JSON body, reporting malformed input as a validation error
/// instead of axum's plain-text rejection.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| http_error(ApiError::validation(rejection.body_text())))
}

pub(crate) fn path_param<T>(path: Result<Path<T>, PathRejection>) -> Result<T, HttpError> {
    path.map(|Path(value)| value)
        .map_err(|rejection| http_error(ApiError::validation(rejection.body_text())))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, HttpError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| http_error(ApiError::validation(rejection.body_text())))
}
