use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use shared::{
    domain::{MovieId, Screening},
    error::ErrorCode,
    protocol::MovieRequest,
};
use storage::{ScreeningFields, Storage};

use super::*;

struct Fixture {
    ctx: ApiContext,
    movie_id: MovieId,
    screening: Screening,
}

async fn setup(capacity: i64) -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_user("ana", "not-a-real-hash", &["user".to_string()])
        .await
        .expect("user");
    let movie = storage
        .insert_movie(&MovieRequest {
            title: "Dune".to_string(),
            duration: 155,
            genre: "sci-fi".to_string(),
            directors: String::new(),
            actors: String::new(),
            screening: None,
            plot: String::new(),
            poster: String::new(),
        })
        .await
        .expect("movie");
    let screening = storage
        .insert_screening(&ScreeningFields {
            movie_id: movie.id,
            date: NaiveDate::from_ymd_opt(2024, 5, 17).expect("date"),
            time: "20:00".to_string(),
            hall: "Sala 1".to_string(),
            num_of_tickets: capacity,
        })
        .await
        .expect("screening");
    let mut ctx = ApiContext::new(storage);
    ctx.policy.backoff = Duration::from_millis(1);
    Fixture {
        ctx,
        movie_id: movie.id,
        screening,
    }
}

fn request(fx: &Fixture, seats: &[&str]) -> CreateReservationRequest {
    CreateReservationRequest {
        username: "ana".to_string(),
        movie_id: fx.movie_id,
        date: "2024-05-17".to_string(),
        time: "20:00".to_string(),
        hall: "Sala 1".to_string(),
        reserv_seats: seats.iter().map(|s| s.to_string()).collect(),
    }
}

async fn current(fx: &Fixture) -> Screening {
    fx.ctx
        .storage
        .screening_by_id(fx.screening.id)
        .await
        .expect("lookup")
        .expect("present")
}

#[tokio::test]
async fn reservation_copies_screening_details_and_books_seats() {
    let fx = setup(50).await;
    let reservation = create_reservation(&fx.ctx, &request(&fx, &["A2", "A1"]), None)
        .await
        .expect("create");

    assert_eq!(reservation.reserv_seats, vec!["A1", "A2"]);
    assert_eq!(reservation.movie_title, "Dune");
    assert_eq!(reservation.screening_id, fx.screening.id);
    assert_eq!(reservation.hall, "Sala 1");
    assert_eq!(reservation.time, "20:00");

    let after = current(&fx).await;
    assert_eq!(after.num_of_res_tickets, 2);
    assert_eq!(after.reserv_seats, vec!["A1", "A2"]);
    assert_eq!(after.version, fx.screening.version + 1);
}

#[tokio::test]
async fn overlapping_seats_leave_everything_unchanged() {
    let fx = setup(50).await;
    create_reservation(&fx.ctx, &request(&fx, &["A1", "A2"]), None)
        .await
        .expect("first");
    let before = current(&fx).await;

    let err = create_reservation(&fx.ctx, &request(&fx, &["A1", "A3"]), None)
        .await
        .expect_err("overlap");
    assert_eq!(err.code, ErrorCode::SeatAlreadyTaken);
    assert!(err.message.contains("A1"), "{}", err.message);

    assert_eq!(current(&fx).await, before);
    let listed = list_reservations_for_user(&fx.ctx, "ana").await.expect("list");
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn full_screening_reports_insufficient_capacity() {
    let fx = setup(2).await;
    create_reservation(&fx.ctx, &request(&fx, &["A1", "A2"]), None)
        .await
        .expect("fill");

    let err = create_reservation(&fx.ctx, &request(&fx, &["A3"]), None)
        .await
        .expect_err("full");
    assert_eq!(err.code, ErrorCode::InsufficientCapacity);
    assert_eq!(current(&fx).await.num_of_res_tickets, 2);
}

#[tokio::test]
async fn missing_movie_user_or_screening_is_not_found() {
    let fx = setup(10).await;

    let mut unknown_movie = request(&fx, &["A1"]);
    unknown_movie.movie_id = MovieId(404);
    let mut unknown_user = request(&fx, &["A1"]);
    unknown_user.username = "ghost".to_string();
    let mut unknown_slot = request(&fx, &["A1"]);
    unknown_slot.time = "23:59".to_string();

    for req in [unknown_movie, unknown_user, unknown_slot] {
        let err = create_reservation(&fx.ctx, &req, None)
            .await
            .expect_err("not found");
        assert_eq!(err.code, ErrorCode::NotFound, "{}", err.message);
    }
    assert_eq!(current(&fx).await, fx.screening);
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_any_write() {
    let fx = setup(10).await;

    let mut bad_date = request(&fx, &["A1"]);
    bad_date.date = "17-05-2024".to_string();
    let no_seats = request(&fx, &[]);
    let duplicated = request(&fx, &["A1", "A1"]);

    for req in [bad_date, no_seats, duplicated] {
        let err = create_reservation(&fx.ctx, &req, None)
            .await
            .expect_err("invalid");
        assert_eq!(err.code, ErrorCode::Validation, "{}", err.message);
    }
    assert_eq!(current(&fx).await, fx.screening);
}

#[tokio::test]
async fn cancelling_restores_the_screening() {
    let fx = setup(50).await;
    create_reservation(&fx.ctx, &request(&fx, &["B1"]), None)
        .await
        .expect("other");
    let before = current(&fx).await;

    let reservation = create_reservation(&fx.ctx, &request(&fx, &["A1", "A2"]), None)
        .await
        .expect("create");
    assert_eq!(current(&fx).await.reserv_seats, vec!["A1", "A2", "B1"]);

    cancel_reservation(&fx.ctx, reservation.id)
        .await
        .expect("cancel");
    let after = current(&fx).await;
    assert_eq!(after.reserv_seats, vec!["B1"]);
    assert_eq!(after.num_of_res_tickets, 1);
    assert_eq!(after.reserv_seats, before.reserv_seats);

    let err = cancel_reservation(&fx.ctx, reservation.id)
        .await
        .expect_err("already gone");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(fx
        .ctx
        .storage
        .reservation_by_id(reservation.id)
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn same_idempotency_key_books_once() {
    let fx = setup(50).await;
    let key = Uuid::new_v4();

    let first = create_reservation(&fx.ctx, &request(&fx, &["C1"]), Some(key))
        .await
        .expect("first");
    let replay = create_reservation(&fx.ctx, &request(&fx, &["C1"]), Some(key))
        .await
        .expect("replay");

    assert_eq!(first.id, replay.id);
    let after = current(&fx).await;
    assert_eq!(after.num_of_res_tickets, 1);
    assert_eq!(after.version, fx.screening.version + 1);
}

#[tokio::test]
async fn reused_idempotency_key_with_other_seats_is_rejected() {
    let fx = setup(50).await;
    let key = Uuid::new_v4();

    let first = create_reservation(&fx.ctx, &request(&fx, &["C1", "C2"]), Some(key))
        .await
        .expect("first");
    let replay = create_reservation(&fx.ctx, &request(&fx, &["C2", "C1"]), Some(key))
        .await
        .expect("same seats in another order");
    assert_eq!(first.id, replay.id);

    let err = create_reservation(&fx.ctx, &request(&fx, &["C3"]), Some(key))
        .await
        .expect_err("different seats");
    assert_eq!(err.code, ErrorCode::Validation);

    let mut other_time = request(&fx, &["C1", "C2"]);
    other_time.time = "22:00".to_string();
    let err = create_reservation(&fx.ctx, &other_time, Some(key))
        .await
        .expect_err("different screening");
    assert_eq!(err.code, ErrorCode::Validation);

    let after = current(&fx).await;
    assert_eq!(after.reserv_seats, vec!["C1", "C2"]);
    assert_eq!(after.num_of_res_tickets, 2);
}

#[tokio::test]
async fn reservations_are_listed_newest_first() {
    let fx = setup(50).await;
    let older = create_reservation(&fx.ctx, &request(&fx, &["A1"]), None)
        .await
        .expect("older");
    let newer = create_reservation(&fx.ctx, &request(&fx, &["A2"]), None)
        .await
        .expect("newer");

    let listed = list_reservations_for_user(&fx.ctx, "ana").await.expect("list");
    let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
    assert!(list_reservations_for_user(&fx.ctx, "nobody")
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn conflicts_are_retried_until_success() {
    let fx = setup(1).await;
    let calls = &AtomicU32::new(0);

    let outcome = with_retries(&fx.ctx, "test", move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ApiError::conflict("screening was modified concurrently"))
        } else {
            Ok("done")
        }
    })
    .await;

    assert_eq!(outcome.expect("eventually succeeds"), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_budget() {
    let fx = setup(1).await;
    let calls = &AtomicU32::new(0);

    let outcome: Result<(), ApiError> = with_retries(&fx.ctx, "test", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::new(ErrorCode::Unavailable, "pool timed out"))
    })
    .await;

    assert_eq!(outcome.expect_err("exhausted").code, ErrorCode::Unavailable);
    assert_eq!(calls.load(Ordering::SeqCst), fx.ctx.policy.max_attempts);
}

#[tokio::test]
async fn rejections_are_not_retried() {
    let fx = setup(1).await;
    let calls = &AtomicU32::new(0);

    let outcome: Result<(), ApiError> = with_retries(&fx.ctx, "test", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::new(ErrorCode::InsufficientCapacity, "full"))
    })
    .await;

    assert_eq!(
        outcome.expect_err("rejected").code,
        ErrorCode::InsufficientCapacity
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
