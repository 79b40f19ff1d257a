use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Executor, Pool, Row, Sqlite,
};
use tracing::debug;

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use shared::{
    domain::{
        Hall, HallId, Movie, MovieId, Reservation, ReservationId, Screening, ScreeningId, UserId,
        UserProfile,
    },
    protocol::{HallRequest, MovieRequest, ScreeningSlot},
};

mod error;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use transaction::StoreTx;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub profile: UserProfile,
    pub password_hash: String,
}

/// Screening fields an administrator may set. Seat state is absent on purpose:
/// only the reservation transaction writes it.
#[derive(Debug, Clone)]
pub struct ScreeningFields {
    pub movie_id: MovieId,
    pub date: NaiveDate,
    pub time: String,
    pub hall: String,
    pub num_of_tickets: i64,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub username: String,
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub movie_title: String,
    pub screening_id: ScreeningId,
    pub date: NaiveDate,
    pub time: String,
    pub hall: String,
    pub created_at: DateTime<Utc>,
    pub reserv_seats: Vec<String>,
    pub idempotency_key: Option<String>,
}

impl Storage {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(%database_url, "sqlite storage ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Opens a transaction scope. Dropping the returned `StoreTx` without
    /// calling `commit` rolls every write back.
    pub async fn begin(&self) -> StoreResult<StoreTx> {
        let tx = self.pool.begin().await?;
        Ok(StoreTx::new(tx))
    }

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        roles: &[String],
    ) -> StoreResult<UserProfile> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO users (username, password_hash, roles, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, username, roles, created_at, updated_at",
        )
        .bind(username)
        .bind(password_hash)
        .bind(serde_json::to_string(roles)?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        user_profile_from_row(&row)
    }

    pub async fn user_by_username(&self, username: &str) -> StoreResult<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, username, roles, created_at, updated_at, password_hash
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> StoreResult<StoredUser> {
            Ok(StoredUser {
                profile: user_profile_from_row(&r)?,
                password_hash: r.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    pub async fn list_halls(&self) -> StoreResult<Vec<Hall>> {
        let rows = sqlx::query(
            "SELECT id, name, row_labels, col_numbers, created_at FROM halls ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hall_from_row).collect()
    }

    pub async fn halls_by_name(&self, name: &str) -> StoreResult<Vec<Hall>> {
        let rows = sqlx::query(
            "SELECT id, name, row_labels, col_numbers, created_at FROM halls WHERE name = ?",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hall_from_row).collect()
    }

    pub async fn hall_by_id(&self, hall_id: HallId) -> StoreResult<Option<Hall>> {
        let row = sqlx::query(
            "SELECT id, name, row_labels, col_numbers, created_at FROM halls WHERE id = ?",
        )
        .bind(hall_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(hall_from_row).transpose()
    }

    pub async fn insert_hall(&self, hall: &HallRequest) -> StoreResult<Hall> {
        let row = sqlx::query(
            "INSERT INTO halls (name, row_labels, col_numbers, created_at) VALUES (?, ?, ?, ?)
             RETURNING id, name, row_labels, col_numbers, created_at",
        )
        .bind(&hall.name)
        .bind(serde_json::to_string(&hall.rows)?)
        .bind(serde_json::to_string(&hall.cols)?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        hall_from_row(&row)
    }

    pub async fn update_hall(&self, hall_id: HallId, hall: &HallRequest) -> StoreResult<Hall> {
        let row = sqlx::query(
            "UPDATE halls SET name = ?, row_labels = ?, col_numbers = ? WHERE id = ?
             RETURNING id, name, row_labels, col_numbers, created_at",
        )
        .bind(&hall.name)
        .bind(serde_json::to_string(&hall.rows)?)
        .bind(serde_json::to_string(&hall.cols)?)
        .bind(hall_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(hall_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound("hall"))
    }

    pub async fn delete_hall(&self, hall_id: HallId) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM halls WHERE id = ?")
            .bind(hall_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("hall"));
        }
        Ok(())
    }

    pub async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        let rows = sqlx::query(
            "SELECT id, title, duration, genre, directors, actors, premiere, plot, poster, created_at
             FROM movies ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(movie_from_row).collect()
    }

    pub async fn movie_by_id(&self, movie_id: MovieId) -> StoreResult<Option<Movie>> {
        fetch_movie(&self.pool, movie_id).await
    }

    pub async fn insert_movie(&self, movie: &MovieRequest) -> StoreResult<Movie> {
        let row = sqlx::query(
            "INSERT INTO movies (title, duration, genre, directors, actors, premiere, plot, poster, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, title, duration, genre, directors, actors, premiere, plot, poster, created_at",
        )
        .bind(&movie.title)
        .bind(movie.duration)
        .bind(&movie.genre)
        .bind(&movie.directors)
        .bind(&movie.actors)
        .bind(movie.screening)
        .bind(&movie.plot)
        .bind(&movie.poster)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        movie_from_row(&row)
    }

    pub async fn update_movie(&self, movie_id: MovieId, movie: &MovieRequest) -> StoreResult<Movie> {
        let row = sqlx::query(
            "UPDATE movies
             SET title = ?, duration = ?, genre = ?, directors = ?, actors = ?, premiere = ?, plot = ?, poster = ?
             WHERE id = ?
             RETURNING id, title, duration, genre, directors, actors, premiere, plot, poster, created_at",
        )
        .bind(&movie.title)
        .bind(movie.duration)
        .bind(&movie.genre)
        .bind(&movie.directors)
        .bind(&movie.actors)
        .bind(movie.screening)
        .bind(&movie.plot)
        .bind(&movie.poster)
        .bind(movie_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(movie_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound("movie"))
    }

    /// Refuses to delete a movie that still has screenings scheduled.
    pub async fn delete_movie(&self, movie_id: MovieId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let screenings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM screenings WHERE movie_id = ?")
            .bind(movie_id.0)
            .fetch_one(&mut *tx)
            .await?;
        if screenings > 0 {
            return Err(StoreError::Conflict(format!(
                "movie {movie_id} still has {screenings} screening(s)"
            )));
        }
        let deleted = sqlx::query("DELETE FROM movies WHERE id = ?")
            .bind(movie_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("movie"));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn movie_screening_slots(&self, movie_id: MovieId) -> StoreResult<Vec<ScreeningSlot>> {
        let rows = sqlx::query(
            "SELECT date, time, hall FROM screenings WHERE movie_id = ? ORDER BY date ASC, time ASC",
        )
        .bind(movie_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> StoreResult<ScreeningSlot> {
                Ok(ScreeningSlot {
                    date: r.try_get("date")?,
                    time: r.try_get("time")?,
                    hall: r.try_get("hall")?,
                })
            })
            .collect()
    }

    pub async fn list_screenings(&self) -> StoreResult<Vec<Screening>> {
        let rows = sqlx::query(
            "SELECT id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at
             FROM screenings ORDER BY date ASC, time ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(screening_from_row).collect()
    }

    pub async fn screening_by_id(&self, screening_id: ScreeningId) -> StoreResult<Option<Screening>> {
        fetch_screening(&self.pool, screening_id).await
    }

    /// Screenings of one movie whose date falls inside `[start, end]`.
    pub async fn screenings_for_movie(
        &self,
        movie_id: MovieId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<Screening>> {
        let rows = sqlx::query(
            "SELECT id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at
             FROM screenings
             WHERE movie_id = ? AND date >= ? AND date <= ?
             ORDER BY date ASC, time ASC",
        )
        .bind(movie_id.0)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(screening_from_row).collect()
    }

    pub async fn insert_screening(&self, fields: &ScreeningFields) -> StoreResult<Screening> {
        let row = sqlx::query(
            "INSERT INTO screenings (movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at)
             VALUES (?, ?, ?, ?, ?, 0, '[]', 0, ?)
             RETURNING id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at",
        )
        .bind(fields.movie_id.0)
        .bind(fields.date)
        .bind(&fields.time)
        .bind(&fields.hall)
        .bind(fields.num_of_tickets)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        screening_from_row(&row)
    }

    /// Rewrites the administrative fields of a screening, provided nobody has
    /// touched it since `expected_version` was read.
    pub async fn update_screening_details(
        &self,
        screening_id: ScreeningId,
        expected_version: i64,
        fields: &ScreeningFields,
    ) -> StoreResult<Screening> {
        let row = sqlx::query(
            "UPDATE screenings
             SET movie_id = ?, date = ?, time = ?, hall = ?, num_of_tickets = ?, version = version + 1
             WHERE id = ? AND version = ?
             RETURNING id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at",
        )
        .bind(fields.movie_id.0)
        .bind(fields.date)
        .bind(&fields.time)
        .bind(&fields.hall)
        .bind(fields.num_of_tickets)
        .bind(screening_id.0)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => screening_from_row(&row),
            None => Err(missing_or_stale(&self.pool, screening_id).await),
        }
    }

    /// Deletes a screening unless reservations still point at it.
    pub async fn delete_screening(&self, screening_id: ScreeningId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let reservations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE screening_id = ?")
                .bind(screening_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if reservations > 0 {
            return Err(StoreError::Conflict(format!(
                "screening {screening_id} still has {reservations} reservation(s)"
            )));
        }
        let deleted = sqlx::query("DELETE FROM screenings WHERE id = ?")
            .bind(screening_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("screening"));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes every screening of a movie, or none of them if any is reserved.
    pub async fn delete_screenings_for_movie(&self, movie_id: MovieId) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let reservations: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM reservations r
             INNER JOIN screenings s ON s.id = r.screening_id
             WHERE s.movie_id = ?",
        )
        .bind(movie_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if reservations > 0 {
            return Err(StoreError::Conflict(format!(
                "screenings of movie {movie_id} still have {reservations} reservation(s)"
            )));
        }
        let deleted = sqlx::query("DELETE FROM screenings WHERE movie_id = ?")
            .bind(movie_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("screening"));
        }
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn reservation_by_id(
        &self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>> {
        fetch_reservation(&self.pool, reservation_id).await
    }

    pub async fn reservations_for_user(&self, username: &str) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT id, username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats
             FROM reservations
             WHERE username = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reservation_from_row).collect()
    }

    pub async fn reservations_for_screening(
        &self,
        screening_id: ScreeningId,
    ) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT id, username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats
             FROM reservations
             WHERE screening_id = ?
             ORDER BY id ASC",
        )
        .bind(screening_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reservation_from_row).collect()
    }
}

pub(crate) async fn fetch_movie<'e, E>(exec: E, movie_id: MovieId) -> StoreResult<Option<Movie>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, title, duration, genre, directors, actors, premiere, plot, poster, created_at
         FROM movies WHERE id = ?",
    )
    .bind(movie_id.0)
    .fetch_optional(exec)
    .await?;
    row.as_ref().map(movie_from_row).transpose()
}

pub(crate) async fn fetch_screening<'e, E>(
    exec: E,
    screening_id: ScreeningId,
) -> StoreResult<Option<Screening>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at
         FROM screenings WHERE id = ?",
    )
    .bind(screening_id.0)
    .fetch_optional(exec)
    .await?;
    row.as_ref().map(screening_from_row).transpose()
}

pub(crate) async fn fetch_reservation<'e, E>(
    exec: E,
    reservation_id: ReservationId,
) -> StoreResult<Option<Reservation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats
         FROM reservations WHERE id = ?",
    )
    .bind(reservation_id.0)
    .fetch_optional(exec)
    .await?;
    row.as_ref().map(reservation_from_row).transpose()
}

/// Explains why a version-guarded screening update touched no row.
pub(crate) async fn missing_or_stale<'e, E>(exec: E, screening_id: ScreeningId) -> StoreError
where
    E: Executor<'e, Database = Sqlite>,
{
    let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM screenings WHERE id = ?")
        .bind(screening_id.0)
        .fetch_optional(exec)
        .await;
    match exists {
        Ok(Some(_)) => StoreError::Conflict(format!(
            "screening {screening_id} was modified concurrently"
        )),
        Ok(None) => StoreError::NotFound("screening"),
        Err(err) => err.into(),
    }
}

fn user_profile_from_row(row: &SqliteRow) -> StoreResult<UserProfile> {
    let roles: String = row.try_get("roles")?;
    Ok(UserProfile {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        roles: serde_json::from_str(&roles)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn hall_from_row(row: &SqliteRow) -> StoreResult<Hall> {
    let rows: String = row.try_get("row_labels")?;
    let cols: String = row.try_get("col_numbers")?;
    Ok(Hall {
        id: HallId(row.try_get("id")?),
        name: row.try_get("name")?,
        rows: serde_json::from_str(&rows)?,
        cols: serde_json::from_str(&cols)?,
        created_at: row.try_get("created_at")?,
    })
}

fn movie_from_row(row: &SqliteRow) -> StoreResult<Movie> {
    Ok(Movie {
        id: MovieId(row.try_get("id")?),
        title: row.try_get("title")?,
        duration: row.try_get("duration")?,
        genre: row.try_get("genre")?,
        directors: row.try_get("directors")?,
        actors: row.try_get("actors")?,
        screening: row.try_get("premiere")?,
        plot: row.try_get("plot")?,
        poster: row.try_get("poster")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn screening_from_row(row: &SqliteRow) -> StoreResult<Screening> {
    let seats: String = row.try_get("reserv_seats")?;
    Ok(Screening {
        id: ScreeningId(row.try_get("id")?),
        movie_id: MovieId(row.try_get("movie_id")?),
        date: row.try_get("date")?,
        time: row.try_get("time")?,
        hall: row.try_get("hall")?,
        num_of_tickets: row.try_get("num_of_tickets")?,
        num_of_res_tickets: row.try_get("num_of_res_tickets")?,
        reserv_seats: serde_json::from_str(&seats)?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn reservation_from_row(row: &SqliteRow) -> StoreResult<Reservation> {
    let seats: String = row.try_get("reserv_seats")?;
    Ok(Reservation {
        id: ReservationId(row.try_get("id")?),
        username: row.try_get("username")?,
        user_id: UserId(row.try_get("user_id")?),
        movie_id: MovieId(row.try_get("movie_id")?),
        screening_id: ScreeningId(row.try_get("screening_id")?),
        movie_title: row.try_get("movie_title")?,
        date: row.try_get("date")?,
        time: row.try_get("time")?,
        hall: row.try_get("hall")?,
        created_at: row.try_get("created_at")?,
        reserv_seats: serde_json::from_str(&seats)?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
