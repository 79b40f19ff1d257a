use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use booking::{accounts, ApiContext, ReservationPolicy};
use serde::Deserialize;
use shared::{
    domain::{Reservation, ReservationId, UserProfile, DEFAULT_ROLE},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateReservationRequest, LoginRequest, LoginResponse, MessageResponse,
        RegisterUserRequest, RenewAccessRequest, RenewAccessResponse, ReservationCreatedResponse,
    },
};
use storage::Storage;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod app_state;
mod auth;
mod catalog;
mod config;

use app_state::{http_error, json_body, path_param, query_params, AppState, HttpError};
use auth::{issue_token, verify_token, AuthUser, TokenConfig, TokenKind, MIN_SYMMETRIC_KEY_LEN};
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 1024 * 1024;
const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

#[derive(Debug, Deserialize)]
struct UsernameQuery {
    username: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    if settings.token_symmetric_key.len() < MIN_SYMMETRIC_KEY_LEN {
        anyhow::bail!("token_symmetric_key must be at least {MIN_SYMMETRIC_KEY_LEN} characters");
    }
    if settings.uses_dev_token_key() && settings.environment != "development" {
        warn!(environment = %settings.environment, "using the built-in development token key");
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        policy: ReservationPolicy {
            max_attempts: settings.reservation_max_attempts,
            ..ReservationPolicy::default()
        },
    };
    let tokens = TokenConfig {
        symmetric_key: settings.token_symmetric_key,
        access_ttl_seconds: settings.access_token_ttl_seconds,
        refresh_ttl_seconds: settings.refresh_token_ttl_seconds,
    };

    let app = build_router(Arc::new(AppState { api, tokens }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, environment = %settings.environment, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users", post(create_user))
        .route("/users/login", post(login_user))
        .route("/tokens/renew_access", post(renew_access_token))
        .route("/halls", get(catalog::list_halls).post(catalog::create_hall))
        .route(
            "/halls/:hall",
            get(catalog::search_halls)
                .put(catalog::update_hall)
                .delete(catalog::delete_hall),
        )
        .route("/movies", get(catalog::list_movies).post(catalog::create_movie))
        .route(
            "/movies/:id",
            get(catalog::get_movie)
                .put(catalog::update_movie)
                .delete(catalog::delete_movie),
        )
        .route(
            "/repertoires",
            get(catalog::list_screenings).post(catalog::create_screening),
        )
        .route(
            "/repertoires/movie",
            get(catalog::screenings_for_movie).delete(catalog::delete_screenings_for_movie),
        )
        .route(
            "/repertoires/:id",
            get(catalog::get_screening)
                .put(catalog::update_screening)
                .delete(catalog::delete_screening),
        )
        .route("/reservation", post(create_reservation))
        .route("/reservation/:id", delete(cancel_reservation))
        .route("/reservationforuser", get(reservations_for_user))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            IDEMPOTENCY_KEY,
        ])
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        http_error(ApiError::new(
            ErrorCode::Unavailable,
            format!("storage not ready: {e}"),
        ))
    })?;
    Ok("ok")
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserProfile>), HttpError> {
    let req = json_body(body)?;
    let user = accounts::register_user(&state.api, &req.username, &req.password)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, HttpError> {
    let req = json_body(body)?;
    let user = accounts::authenticate(&state.api, &req.username, &req.password)
        .await
        .map_err(http_error)?;
    let role = user
        .roles
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_ROLE);

    let access = issue_token(&state.tokens, &user.username, role, TokenKind::Access)
        .map_err(token_mint_failed)?;
    let refresh = issue_token(&state.tokens, &user.username, role, TokenKind::Refresh)
        .map_err(token_mint_failed)?;
    info!(user_id = %user.id, "user logged in");

    Ok(Json(LoginResponse {
        access_token: access.token,
        access_token_expires_at: access.expires_at,
        refresh_token: refresh.token,
        refresh_token_expires_at: refresh.expires_at,
        user,
    }))
}

async fn renew_access_token(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RenewAccessRequest>, JsonRejection>,
) -> Result<Json<RenewAccessResponse>, HttpError> {
    let req = json_body(body)?;
    let claims =
        verify_token(&state.tokens, &req.refresh_token, TokenKind::Refresh).map_err(http_error)?;
    let access = issue_token(&state.tokens, &claims.sub, &claims.role, TokenKind::Access)
        .map_err(token_mint_failed)?;
    Ok(Json(RenewAccessResponse {
        access_token: access.token,
        access_token_expires_at: access.expires_at,
    }))
}

async fn create_reservation(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    headers: HeaderMap,
    body: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservationCreatedResponse>), HttpError> {
    let key = idempotency_key(&headers)?;
    let req = json_body(body)?;
    let reservation = booking::create_reservation(&state.api, &req, key)
        .await
        .map_err(http_error)?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationCreatedResponse {
            message: "Reservation added successfully".to_string(),
            reservation,
        }),
    ))
}

async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    reservation_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    let reservation_id = path_param(reservation_id)?;
    info!(caller = %caller.sub, reservation_id, "cancel requested");
    booking::cancel_reservation(&state.api, ReservationId(reservation_id))
        .await
        .map_err(http_error)?;
    Ok(Json(MessageResponse::new("Reservation canceled successfully")))
}

async fn reservations_for_user(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    q: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Json<Vec<Reservation>>, HttpError> {
    let q = query_params(q)?;
    let reservations = booking::list_reservations_for_user(&state.api, &q.username)
        .await
        .map_err(http_error)?;
    Ok(Json(reservations))
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>, HttpError> {
    let Some(raw) = headers.get(&IDEMPOTENCY_KEY) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .map(Some)
        .ok_or_else(|| http_error(ApiError::validation("Idempotency-Key must be a UUID")))
}

fn token_mint_failed(err: jsonwebtoken::errors::Error) -> HttpError {
    error!(error = %err, "failed to sign token");
    http_error(ApiError::internal("failed to create token"))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
