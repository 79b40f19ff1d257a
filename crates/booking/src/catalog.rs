//! Halls, movies and screenings.

use shared::{
    domain::{Hall, HallId, Movie, MovieId, Screening, ScreeningId},
    error::ApiError,
    protocol::{parse_date, HallRequest, MovieDetail, MovieRequest, ScreeningRequest},
};
use storage::ScreeningFields;
use tracing::info;

use crate::{store_error, unique_violation, ApiContext};

pub async fn list_halls(ctx: &ApiContext) -> Result<Vec<Hall>, ApiError> {
    ctx.storage.list_halls().await.map_err(store_error)
}

pub async fn find_halls_by_name(ctx: &ApiContext, name: &str) -> Result<Vec<Hall>, ApiError> {
    ctx.storage.halls_by_name(name).await.map_err(store_error)
}

pub async fn get_hall(ctx: &ApiContext, hall_id: HallId) -> Result<Hall, ApiError> {
    ctx.storage
        .hall_by_id(hall_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("hall {hall_id} not found")))
}

pub async fn create_hall(ctx: &ApiContext, request: &HallRequest) -> Result<Hall, ApiError> {
    validate_hall(request)?;
    let hall = ctx
        .storage
        .insert_hall(request)
        .await
        .map_err(|err| unique_violation(err, || format!("hall {} already exists", request.name)))?;
    info!(hall_id = %hall.id, "hall created");
    Ok(hall)
}

pub async fn update_hall(
    ctx: &ApiContext,
    hall_id: HallId,
    request: &HallRequest,
) -> Result<Hall, ApiError> {
    validate_hall(request)?;
    ctx.storage
        .update_hall(hall_id, request)
        .await
        .map_err(|err| unique_violation(err, || format!("hall {} already exists", request.name)))
}

pub async fn delete_hall(ctx: &ApiContext, hall_id: HallId) -> Result<(), ApiError> {
    ctx.storage.delete_hall(hall_id).await.map_err(store_error)?;
    info!(%hall_id, "hall deleted");
    Ok(())
}

fn validate_hall(request: &HallRequest) -> Result<(), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("hall name must not be empty"));
    }
    Ok(())
}

pub async fn list_movies(ctx: &ApiContext) -> Result<Vec<Movie>, ApiError> {
    ctx.storage.list_movies().await.map_err(store_error)
}

/// A movie together with the slots it is scheduled in.
pub async fn get_movie(ctx: &ApiContext, movie_id: MovieId) -> Result<MovieDetail, ApiError> {
    let movie = ctx
        .storage
        .movie_by_id(movie_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("movie {movie_id} not found")))?;
    let screenings = ctx
        .storage
        .movie_screening_slots(movie_id)
        .await
        .map_err(store_error)?;
    Ok(MovieDetail { movie, screenings })
}

pub async fn create_movie(ctx: &ApiContext, request: &MovieRequest) -> Result<Movie, ApiError> {
    validate_movie(request)?;
    let movie = ctx
        .storage
        .insert_movie(request)
        .await
        .map_err(|err| unique_violation(err, || format!("movie {} already exists", request.title)))?;
    info!(movie_id = %movie.id, "movie created");
    Ok(movie)
}

pub async fn update_movie(
    ctx: &ApiContext,
    movie_id: MovieId,
    request: &MovieRequest,
) -> Result<Movie, ApiError> {
    validate_movie(request)?;
    ctx.storage
        .update_movie(movie_id, request)
        .await
        .map_err(|err| unique_violation(err, || format!("movie {} already exists", request.title)))
}

pub async fn delete_movie(ctx: &ApiContext, movie_id: MovieId) -> Result<(), ApiError> {
    ctx.storage.delete_movie(movie_id).await.map_err(store_error)?;
    info!(%movie_id, "movie deleted");
    Ok(())
}

fn validate_movie(request: &MovieRequest) -> Result<(), ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::validation("movie title must not be empty"));
    }
    if request.duration < 0 {
        return Err(ApiError::validation("movie duration must not be negative"));
    }
    Ok(())
}

pub async fn list_screenings(ctx: &ApiContext) -> Result<Vec<Screening>, ApiError> {
    ctx.storage.list_screenings().await.map_err(store_error)
}

pub async fn get_screening(
    ctx: &ApiContext,
    screening_id: ScreeningId,
) -> Result<Screening, ApiError> {
    ctx.storage
        .screening_by_id(screening_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("screening {screening_id} not found")))
}

/// Screenings of `movie_id` dated between `start_date` and `end_date`, both
/// inclusive. Dates are `YYYY-MM-DD`.
pub async fn screenings_for_movie(
    ctx: &ApiContext,
    movie_id: MovieId,
    start_date: &str,
    end_date: &str,
) -> Result<Vec<Screening>, ApiError> {
    let start = parse_date(start_date)?;
    let end = parse_date(end_date)?;
    if end < start {
        return Err(ApiError::validation("end_date must not be before start_date"));
    }
    ctx.storage
        .screenings_for_movie(movie_id, start, end)
        .await
        .map_err(store_error)
}

pub async fn create_screening(
    ctx: &ApiContext,
    request: &ScreeningRequest,
) -> Result<Screening, ApiError> {
    let fields = screening_fields(request)?;
    ensure_movie_exists(ctx, fields.movie_id).await?;
    let screening = ctx
        .storage
        .insert_screening(&fields)
        .await
        .map_err(|err| unique_violation(err, || duplicate_slot(&fields)))?;
    info!(
        screening_id = %screening.id,
        movie_id = %screening.movie_id,
        capacity = screening.num_of_tickets,
        "screening created"
    );
    Ok(screening)
}

/// Edits the schedule or capacity of a screening. Seat state is kept, and
/// capacity may not drop below the seats already reserved.
pub async fn update_screening(
    ctx: &ApiContext,
    screening_id: ScreeningId,
    request: &ScreeningRequest,
) -> Result<Screening, ApiError> {
    let fields = screening_fields(request)?;
    let current = get_screening(ctx, screening_id).await?;
    if fields.num_of_tickets < current.num_of_res_tickets {
        return Err(ApiError::validation(format!(
            "numOfTickets cannot be lower than the {} seats already reserved",
            current.num_of_res_tickets
        )));
    }
    if fields.movie_id != current.movie_id {
        ensure_movie_exists(ctx, fields.movie_id).await?;
    }
    ctx.storage
        .update_screening_details(screening_id, current.version, &fields)
        .await
        .map_err(|err| unique_violation(err, || duplicate_slot(&fields)))
}

pub async fn delete_screening(ctx: &ApiContext, screening_id: ScreeningId) -> Result<(), ApiError> {
    ctx.storage
        .delete_screening(screening_id)
        .await
        .map_err(store_error)?;
    info!(%screening_id, "screening deleted");
    Ok(())
}

/// Removes every screening of a movie. Nothing is removed if any of them
/// still has reservations.
pub async fn delete_screenings_for_movie(
    ctx: &ApiContext,
    movie_id: MovieId,
) -> Result<u64, ApiError> {
    let deleted = ctx
        .storage
        .delete_screenings_for_movie(movie_id)
        .await
        .map_err(store_error)?;
    info!(%movie_id, deleted, "screenings deleted");
    Ok(deleted)
}

fn screening_fields(request: &ScreeningRequest) -> Result<ScreeningFields, ApiError> {
    let date = parse_date(&request.date)?;
    if request.num_of_tickets <= 0 {
        return Err(ApiError::validation("numOfTickets must be greater than zero"));
    }
    if request.time.trim().is_empty() || request.hall.trim().is_empty() {
        return Err(ApiError::validation("time and hall must not be empty"));
    }
    Ok(ScreeningFields {
        movie_id: request.movie_id,
        date,
        time: request.time.trim().to_string(),
        hall: request.hall.trim().to_string(),
        num_of_tickets: request.num_of_tickets,
    })
}

async fn ensure_movie_exists(ctx: &ApiContext, movie_id: MovieId) -> Result<(), ApiError> {
    match ctx.storage.movie_by_id(movie_id).await.map_err(store_error)? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found(format!("movie {movie_id} not found"))),
    }
}

fn duplicate_slot(fields: &ScreeningFields) -> String {
    format!(
        "movie {} is already scheduled on {} at {} in {}",
        fields.movie_id, fields.date, fields.time, fields.hall
    )
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
