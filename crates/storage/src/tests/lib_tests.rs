use super::*;

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

fn movie_request(title: &str) -> MovieRequest {
    MovieRequest {
        title: title.to_string(),
        duration: 120,
        genre: "drama".to_string(),
        directors: "A. Director".to_string(),
        actors: "Someone".to_string(),
        screening: Some(day("2024-05-01")),
        plot: String::new(),
        poster: String::new(),
    }
}

async fn seeded(storage: &Storage) -> (Movie, Screening) {
    let movie = storage
        .insert_movie(&movie_request("Dune"))
        .await
        .expect("movie");
    let screening = storage
        .insert_screening(&ScreeningFields {
            movie_id: movie.id,
            date: day("2024-05-17"),
            time: "20:00".to_string(),
            hall: "Sala 1".to_string(),
            num_of_tickets: 10,
        })
        .await
        .expect("screening");
    (movie, screening)
}

fn reservation_for(
    user: &UserProfile,
    movie: &Movie,
    screening: &Screening,
    seats: &[&str],
    key: Option<&str>,
) -> NewReservation {
    NewReservation {
        username: user.username.clone(),
        user_id: user.id,
        movie_id: movie.id,
        movie_title: movie.title.clone(),
        screening_id: screening.id,
        date: screening.date,
        time: screening.time.clone(),
        hall: screening.hall.clone(),
        created_at: Utc::now(),
        reserv_seats: seats.iter().map(|s| s.to_string()).collect(),
        idempotency_key: key.map(str::to_string),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("cinema.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[test]
fn sqlite_path_ignores_memory_and_query_suffix() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://db"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/cinema.db?mode=rwc"),
        Some(PathBuf::from("./data/cinema.db"))
    );
}

#[tokio::test]
async fn users_are_unique_by_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let roles = vec!["user".to_string()];
    let user = storage
        .create_user("ana", "hash", &roles)
        .await
        .expect("user");
    assert_eq!(user.roles, roles);

    let stored = storage
        .user_by_username("ana")
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.profile, user);
    assert_eq!(stored.password_hash, "hash");

    let err = storage
        .create_user("ana", "other", &roles)
        .await
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    assert!(storage
        .user_by_username("nobody")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn hall_crud_round_trip() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let hall = storage
        .insert_hall(&HallRequest {
            name: "Sala 1".to_string(),
            rows: vec!["A".to_string(), "B".to_string()],
            cols: vec![1, 2, 3],
        })
        .await
        .expect("hall");
    assert_eq!(storage.halls_by_name("Sala 1").await.expect("by name"), vec![hall.clone()]);

    let updated = storage
        .update_hall(
            hall.id,
            &HallRequest {
                name: "Sala 2".to_string(),
                rows: vec!["A".to_string()],
                cols: vec![1],
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.name, "Sala 2");
    assert_eq!(updated.created_at, hall.created_at);

    storage.delete_hall(hall.id).await.expect("delete");
    assert!(storage.list_halls().await.expect("list").is_empty());
    assert!(matches!(
        storage.delete_hall(hall.id).await,
        Err(StoreError::NotFound("hall"))
    ));
}

#[tokio::test]
async fn movie_with_screenings_cannot_be_deleted() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, screening) = seeded(&storage).await;

    let slots = storage
        .movie_screening_slots(movie.id)
        .await
        .expect("slots");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].hall, "Sala 1");

    assert!(matches!(
        storage.delete_movie(movie.id).await,
        Err(StoreError::Conflict(_))
    ));

    storage
        .delete_screening(screening.id)
        .await
        .expect("delete screening");
    storage.delete_movie(movie.id).await.expect("delete movie");
    assert!(storage.movie_by_id(movie.id).await.expect("lookup").is_none());
}

#[tokio::test]
async fn screenings_for_movie_uses_inclusive_window() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, _) = seeded(&storage).await;
    for date in ["2024-05-18", "2024-05-25"] {
        storage
            .insert_screening(&ScreeningFields {
                movie_id: movie.id,
                date: day(date),
                time: "18:00".to_string(),
                hall: "Sala 1".to_string(),
                num_of_tickets: 5,
            })
            .await
            .expect("screening");
    }

    let window = storage
        .screenings_for_movie(movie.id, day("2024-05-17"), day("2024-05-18"))
        .await
        .expect("window");
    let dates: Vec<_> = window.iter().map(|s| s.date).collect();
    assert_eq!(dates, vec![day("2024-05-17"), day("2024-05-18")]);
}

#[tokio::test]
async fn duplicate_screening_slot_is_a_conflict() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, screening) = seeded(&storage).await;
    let err = storage
        .insert_screening(&ScreeningFields {
            movie_id: movie.id,
            date: screening.date,
            time: screening.time.clone(),
            hall: screening.hall.clone(),
            num_of_tickets: 3,
        })
        .await
        .expect_err("duplicate slot");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
}

#[tokio::test]
async fn screening_details_update_requires_current_version() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, screening) = seeded(&storage).await;
    let fields = ScreeningFields {
        movie_id: movie.id,
        date: screening.date,
        time: "21:30".to_string(),
        hall: screening.hall.clone(),
        num_of_tickets: 12,
    };

    let updated = storage
        .update_screening_details(screening.id, screening.version, &fields)
        .await
        .expect("update");
    assert_eq!(updated.version, screening.version + 1);
    assert_eq!(updated.num_of_tickets, 12);

    assert!(matches!(
        storage
            .update_screening_details(screening.id, screening.version, &fields)
            .await,
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        storage
            .update_screening_details(ScreeningId(9_999), 0, &fields)
            .await,
        Err(StoreError::NotFound("screening"))
    ));
}

#[tokio::test]
async fn seat_update_is_guarded_by_version() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (_, screening) = seeded(&storage).await;

    let mut next = screening.clone();
    next.reserv_seats = vec!["A1".to_string(), "A2".to_string()];
    next.num_of_res_tickets = 2;

    let mut tx = storage.begin().await.expect("tx");
    let written = tx.update_screening_seats(&next).await.expect("cas");
    assert_eq!(written.version, screening.version + 1);
    assert_eq!(written.reserv_seats, next.reserv_seats);

    // Same snapshot again: the row has moved on.
    let err = tx.update_screening_seats(&next).await.expect_err("stale");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    tx.commit().await.expect("commit");

    let stored = storage
        .screening_by_id(screening.id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.num_of_res_tickets, 2);
    assert_eq!(stored.version, screening.version + 1);
}

#[tokio::test]
async fn reserved_count_cannot_exceed_capacity() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (_, screening) = seeded(&storage).await;

    let mut next = screening.clone();
    next.num_of_res_tickets = screening.num_of_tickets + 1;

    let mut tx = storage.begin().await.expect("tx");
    let err = tx.update_screening_seats(&next).await.expect_err("check");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
}

#[tokio::test]
async fn dropped_transaction_leaves_no_trace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("rollback.db").display());
    let storage = Storage::new(&url).await.expect("db");
    let (movie, screening) = seeded(&storage).await;
    let user = storage
        .create_user("ana", "hash", &["user".to_string()])
        .await
        .expect("user");

    {
        let mut tx = storage.begin().await.expect("tx");
        let mut next = screening.clone();
        next.reserv_seats = vec!["A1".to_string()];
        next.num_of_res_tickets = 1;
        tx.update_screening_seats(&next).await.expect("cas");
        tx.insert_reservation(&reservation_for(&user, &movie, &screening, &["A1"], None))
            .await
            .expect("insert");
        assert_eq!(tx.reservation_count().await.expect("count"), 1);
    }

    let stored = storage
        .screening_by_id(screening.id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(stored, screening);
    assert!(storage
        .reservations_for_user("ana")
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn reservations_are_found_by_key_and_listed_newest_first() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, screening) = seeded(&storage).await;
    let user = storage
        .create_user("ana", "hash", &["user".to_string()])
        .await
        .expect("user");

    let mut tx = storage.begin().await.expect("tx");
    let first = tx
        .insert_reservation(&reservation_for(&user, &movie, &screening, &["A1"], Some("key-1")))
        .await
        .expect("first");
    let second = tx
        .insert_reservation(&reservation_for(&user, &movie, &screening, &["A2"], None))
        .await
        .expect("second");
    let by_key = tx
        .reservation_by_idempotency_key("key-1")
        .await
        .expect("by key")
        .expect("present");
    assert_eq!(by_key, first);

    let dup = tx
        .insert_reservation(&reservation_for(&user, &movie, &screening, &["A3"], Some("key-1")))
        .await
        .expect_err("duplicate key");
    assert!(matches!(dup, StoreError::Conflict(_)), "{dup:?}");
    tx.commit().await.expect("commit");

    let listed = storage.reservations_for_user("ana").await.expect("list");
    let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(listed[1].movie_title, "Dune");
}

#[tokio::test]
async fn screening_with_reservations_cannot_be_deleted() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (movie, screening) = seeded(&storage).await;
    let user = storage
        .create_user("ana", "hash", &["user".to_string()])
        .await
        .expect("user");

    let mut tx = storage.begin().await.expect("tx");
    let reservation = tx
        .insert_reservation(&reservation_for(&user, &movie, &screening, &["A1"], None))
        .await
        .expect("insert");
    tx.commit().await.expect("commit");

    assert!(matches!(
        storage.delete_screening(screening.id).await,
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        storage.delete_screenings_for_movie(movie.id).await,
        Err(StoreError::Conflict(_))
    ));

    let mut tx = storage.begin().await.expect("tx");
    tx.delete_reservation(reservation.id).await.expect("delete");
    assert!(matches!(
        tx.delete_reservation(reservation.id).await,
        Err(StoreError::NotFound("reservation"))
    ));
    tx.commit().await.expect("commit");

    assert_eq!(
        storage
            .delete_screenings_for_movie(movie.id)
            .await
            .expect("delete all"),
        1
    );
    assert!(matches!(
        storage.delete_screening(screening.id).await,
        Err(StoreError::NotFound("screening"))
    ));
}
