//! Reservation transactions.
//!
//! Creating or cancelling a reservation touches two records: the screening's
//! seat state and the reservation itself. Both writes happen inside one
//! [`storage::StoreTx`]; either both commit or neither does.

use std::future::Future;

use chrono::Utc;
use shared::{
    domain::{Reservation, ReservationId},
    error::ApiError,
    protocol::{parse_date, CreateReservationRequest},
};
use storage::NewReservation;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    ledger::{self, SeatRequest},
    store_error, ApiContext,
};

/// Books `request.reserv_seats` for the screening identified by movie, date,
/// time and hall.
///
/// When `idempotency_key` is given and a reservation was already created with
/// it, that reservation is returned and nothing is written. Reusing a key for
/// a different user, screening or seat set is a validation error.
pub async fn create_reservation(
    ctx: &ApiContext,
    request: &CreateReservationRequest,
    idempotency_key: Option<Uuid>,
) -> Result<Reservation, ApiError> {
    let date = parse_date(&request.date)?;
    let seats = SeatRequest::new(&request.reserv_seats)?;
    let key = idempotency_key.map(|key| key.to_string());
    let key = key.as_deref();
    let seats = &seats;

    with_retries(ctx, "create_reservation", move || {
        try_create(ctx, request, date, seats, key)
    })
    .await
}

async fn try_create(
    ctx: &ApiContext,
    request: &CreateReservationRequest,
    date: chrono::NaiveDate,
    seats: &SeatRequest,
    idempotency_key: Option<&str>,
) -> Result<Reservation, ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(store_error)?;

    if let Some(key) = idempotency_key {
        if let Some(existing) = tx
            .reservation_by_idempotency_key(key)
            .await
            .map_err(store_error)?
        {
            if !replays(&existing, request, date, seats) {
                return Err(ApiError::validation(format!(
                    "idempotency key {key} was already used for a different reservation"
                )));
            }
            debug!(reservation_id = %existing.id, key, "idempotent replay");
            return Ok(existing);
        }
    }

    let movie = tx
        .movie_by_id(request.movie_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("movie {} not found", request.movie_id)))?;
    let user_id = tx
        .user_by_username(&request.username)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("user {} not found", request.username)))?;
    let screening = tx
        .screening_by_slot(movie.id, date, &request.time, &request.hall)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "no screening of movie {} on {} at {} in {}",
                movie.id, date, request.time, request.hall
            ))
        })?;

    let reserved = ledger::reserve(&screening, seats).map_err(|rejection| {
        debug!(screening_id = %screening.id, %rejection, "reservation rejected");
        ApiError::from(rejection)
    })?;

    let screening = tx
        .update_screening_seats(&reserved.screening)
        .await
        .map_err(store_error)?;
    let reservation = tx
        .insert_reservation(&NewReservation {
            username: request.username.clone(),
            user_id,
            movie_id: movie.id,
            movie_title: movie.title,
            screening_id: screening.id,
            date: screening.date,
            time: screening.time.clone(),
            hall: screening.hall.clone(),
            created_at: Utc::now(),
            reserv_seats: reserved.seats,
            idempotency_key: idempotency_key.map(str::to_string),
        })
        .await
        .map_err(store_error)?;
    tx.commit().await.map_err(store_error)?;

    info!(
        reservation_id = %reservation.id,
        screening_id = %screening.id,
        seats = reservation.reserv_seats.len(),
        reserved = screening.num_of_res_tickets,
        capacity = screening.num_of_tickets,
        "reservation created"
    );
    Ok(reservation)
}

fn replays(
    existing: &Reservation,
    request: &CreateReservationRequest,
    date: chrono::NaiveDate,
    seats: &SeatRequest,
) -> bool {
    existing.username == request.username
        && existing.movie_id == request.movie_id
        && existing.date == date
        && existing.time == request.time
        && existing.hall == request.hall
        && existing.reserv_seats.iter().map(String::as_str).eq(seats.labels())
}

/// Deletes a reservation and returns its seats to the screening.
pub async fn cancel_reservation(
    ctx: &ApiContext,
    reservation_id: ReservationId,
) -> Result<(), ApiError> {
    with_retries(ctx, "cancel_reservation", move || {
        try_cancel(ctx, reservation_id)
    })
    .await
}

async fn try_cancel(ctx: &ApiContext, reservation_id: ReservationId) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(store_error)?;

    let reservation = tx
        .reservation_by_id(reservation_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("reservation {reservation_id} not found")))?;
    let screening = tx
        .screening_by_id(reservation.screening_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "screening {} of reservation {reservation_id} not found",
                reservation.screening_id
            ))
        })?;

    let released = ledger::release(&screening, &reservation.reserv_seats);
    let screening = tx
        .update_screening_seats(&released)
        .await
        .map_err(store_error)?;
    tx.delete_reservation(reservation_id)
        .await
        .map_err(store_error)?;
    tx.commit().await.map_err(store_error)?;

    info!(
        %reservation_id,
        screening_id = %screening.id,
        reserved = screening.num_of_res_tickets,
        "reservation cancelled"
    );
    Ok(())
}

pub async fn list_reservations_for_user(
    ctx: &ApiContext,
    username: &str,
) -> Result<Vec<Reservation>, ApiError> {
    ctx.storage
        .reservations_for_user(username)
        .await
        .map_err(store_error)
}

/// Runs `attempt` until it succeeds, fails for good, or the policy's attempt
/// budget is spent. Each run opens its own transaction, so a retried attempt
/// sees a fresh snapshot.
async fn with_retries<T, F, Fut>(
    ctx: &ApiContext,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = ctx.policy.max_attempts.max(1);
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(err) if err.code.is_retryable() && tries < max_attempts => {
                warn!(operation, attempt = tries, error = %err.message, "retrying transaction");
                tokio::time::sleep(ctx.policy.backoff * tries).await;
                tries += 1;
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
#[path = "tests/reservations_tests.rs"]
mod tests;
