use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use booking::catalog;
use serde::Deserialize;
use shared::{
    domain::{Hall, HallId, Movie, MovieId, Screening, ScreeningId},
    protocol::{HallRequest, MessageResponse, MovieDetail, MovieRequest, ScreeningRequest},
};

use crate::{
    app_state::{http_error, json_body, path_param, query_params, AppState, HttpError},
    auth::AuthUser,
};

#[derive(Debug, Deserialize)]
pub(crate) struct MovieWindowQuery {
    movie_id: i64,
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MovieQuery {
    movie_id: i64,
}

pub(crate) async fn list_halls(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<Vec<Hall>>, HttpError> {
    let halls = catalog::list_halls(&state.api).await.map_err(http_error)?;
    Ok(Json(halls))
}

pub(crate) async fn search_halls(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<Hall>>, HttpError> {
    let name = path_param(name)?;
    let halls = catalog::find_halls_by_name(&state.api, &name)
        .await
        .map_err(http_error)?;
    Ok(Json(halls))
}

pub(crate) async fn create_hall(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    body: Result<Json<HallRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Hall>), HttpError> {
    let req = json_body(body)?;
    let hall = catalog::create_hall(&state.api, &req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(hall)))
}

pub(crate) async fn update_hall(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    hall_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<HallRequest>, JsonRejection>,
) -> Result<Json<Hall>, HttpError> {
    let hall_id = path_param(hall_id)?;
    let req = json_body(body)?;
    let hall = catalog::update_hall(&state.api, HallId(hall_id), &req)
        .await
        .map_err(http_error)?;
    Ok(Json(hall))
}

pub(crate) async fn delete_hall(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    hall_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    let hall_id = path_param(hall_id)?;
    catalog::delete_hall(&state.api, HallId(hall_id))
        .await
        .map_err(http_error)?;
    Ok(Json(MessageResponse::new("Hall has been deleted")))
}

pub(crate) async fn list_movies(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<Vec<Movie>>, HttpError> {
    let movies = catalog::list_movies(&state.api).await.map_err(http_error)?;
    Ok(Json(movies))
}

pub(crate) async fn get_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    movie_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MovieDetail>, HttpError> {
    let movie_id = path_param(movie_id)?;
    let movie = catalog::get_movie(&state.api, MovieId(movie_id))
        .await
        .map_err(http_error)?;
    Ok(Json(movie))
}

pub(crate) async fn create_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    body: Result<Json<MovieRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Movie>), HttpError> {
    let req = json_body(body)?;
    let movie = catalog::create_movie(&state.api, &req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(movie)))
}

pub(crate) async fn update_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    movie_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<MovieRequest>, JsonRejection>,
) -> Result<Json<Movie>, HttpError> {
    let movie_id = path_param(movie_id)?;
    let req = json_body(body)?;
    let movie = catalog::update_movie(&state.api, MovieId(movie_id), &req)
        .await
        .map_err(http_error)?;
    Ok(Json(movie))
}

pub(crate) async fn delete_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    movie_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    let movie_id = path_param(movie_id)?;
    catalog::delete_movie(&state.api, MovieId(movie_id))
        .await
        .map_err(http_error)?;
    Ok(Json(MessageResponse::new("Movie has been deleted")))
}

pub(crate) async fn list_screenings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<Vec<Screening>>, HttpError> {
    let screenings = catalog::list_screenings(&state.api)
        .await
        .map_err(http_error)?;
    Ok(Json(screenings))
}

pub(crate) async fn get_screening(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    screening_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Screening>, HttpError> {
    let screening_id = path_param(screening_id)?;
    let screening = catalog::get_screening(&state.api, ScreeningId(screening_id))
        .await
        .map_err(http_error)?;
    Ok(Json(screening))
}

pub(crate) async fn screenings_for_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    q: Result<Query<MovieWindowQuery>, QueryRejection>,
) -> Result<Json<Vec<Screening>>, HttpError> {
    let q = query_params(q)?;
    let screenings =
        catalog::screenings_for_movie(&state.api, MovieId(q.movie_id), &q.start_date, &q.end_date)
            .await
            .map_err(http_error)?;
    Ok(Json(screenings))
}

pub(crate) async fn create_screening(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    body: Result<Json<ScreeningRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Screening>), HttpError> {
    let req = json_body(body)?;
    let screening = catalog::create_screening(&state.api, &req)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(screening)))
}

pub(crate) async fn update_screening(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    screening_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<ScreeningRequest>, JsonRejection>,
) -> Result<Json<Screening>, HttpError> {
    let screening_id = path_param(screening_id)?;
    let req = json_body(body)?;
    let screening = catalog::update_screening(&state.api, ScreeningId(screening_id), &req)
        .await
        .map_err(http_error)?;
    Ok(Json(screening))
}

pub(crate) async fn delete_screening(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    screening_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    let screening_id = path_param(screening_id)?;
    catalog::delete_screening(&state.api, ScreeningId(screening_id))
        .await
        .map_err(http_error)?;
    Ok(Json(MessageResponse::new("repertoire has been deleted")))
}

pub(crate) async fn delete_screenings_for_movie(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    q: Result<Query<MovieQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    let q = query_params(q)?;
    let deleted = catalog::delete_screenings_for_movie(&state.api, MovieId(q.movie_id))
        .await
        .map_err(http_error)?;
    Ok(Json(MessageResponse::new(format!(
        "{deleted} repertoires have been deleted"
    ))))
}
