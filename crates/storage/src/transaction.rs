use sqlx::{Sqlite, Transaction};

use shared::domain::{Movie, MovieId, Reservation, ReservationId, Screening, ScreeningId, UserId};

use crate::{
    fetch_movie, fetch_reservation, fetch_screening, missing_or_stale, reservation_from_row,
    screening_from_row, NewReservation, StoreError, StoreResult,
};

/// One atomic unit of work against the store.
///
/// Every read and write goes through the same SQLite transaction. Nothing is
/// visible to other connections until [`StoreTx::commit`] succeeds, and
/// dropping the value without committing discards all writes.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn movie_by_id(&mut self, movie_id: MovieId) -> StoreResult<Option<Movie>> {
        fetch_movie(&mut *self.tx, movie_id).await
    }

    /// Returns the user's id for a username, if registered.
    pub async fn user_by_username(&mut self, username: &str) -> StoreResult<Option<UserId>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id.map(UserId))
    }

    pub async fn screening_by_slot(
        &mut self,
        movie_id: MovieId,
        date: chrono::NaiveDate,
        time: &str,
        hall: &str,
    ) -> StoreResult<Option<Screening>> {
        let row = sqlx::query(
            "SELECT id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at
             FROM screenings
             WHERE movie_id = ? AND date = ? AND time = ? AND hall = ?",
        )
        .bind(movie_id.0)
        .bind(date)
        .bind(time)
        .bind(hall)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(screening_from_row).transpose()
    }

    pub async fn screening_by_id(&mut self, screening_id: ScreeningId) -> StoreResult<Option<Screening>> {
        fetch_screening(&mut *self.tx, screening_id).await
    }

    /// Writes the seat state of `updated`, guarded by its `version`.
    ///
    /// `updated.version` must be the version that was read; the stored row
    /// gets `version + 1`. A row that moved on in the meantime yields
    /// [`StoreError::Conflict`].
    pub async fn update_screening_seats(&mut self, updated: &Screening) -> StoreResult<Screening> {
        let row = sqlx::query(
            "UPDATE screenings
             SET num_of_res_tickets = ?, reserv_seats = ?, version = version + 1
             WHERE id = ? AND version = ?
             RETURNING id, movie_id, date, time, hall, num_of_tickets, num_of_res_tickets, reserv_seats, version, created_at",
        )
        .bind(updated.num_of_res_tickets)
        .bind(serde_json::to_string(&updated.reserv_seats)?)
        .bind(updated.id.0)
        .bind(updated.version)
        .fetch_optional(&mut *self.tx)
        .await?;
        match row {
            Some(row) => screening_from_row(&row),
            None => Err(missing_or_stale(&mut *self.tx, updated.id).await),
        }
    }

    pub async fn insert_reservation(&mut self, new: &NewReservation) -> StoreResult<Reservation> {
        let row = sqlx::query(
            "INSERT INTO reservations
                (username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats, idempotency_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats",
        )
        .bind(&new.username)
        .bind(new.user_id.0)
        .bind(new.movie_id.0)
        .bind(new.screening_id.0)
        .bind(&new.movie_title)
        .bind(new.date)
        .bind(&new.time)
        .bind(&new.hall)
        .bind(new.created_at)
        .bind(serde_json::to_string(&new.reserv_seats)?)
        .bind(new.idempotency_key.as_deref())
        .fetch_one(&mut *self.tx)
        .await?;
        reservation_from_row(&row)
    }

    pub async fn reservation_by_id(
        &mut self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>> {
        fetch_reservation(&mut *self.tx, reservation_id).await
    }

    pub async fn reservation_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query(
            "SELECT id, username, user_id, movie_id, screening_id, movie_title, date, time, hall, created_at, reserv_seats
             FROM reservations WHERE idempotency_key = ?",
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    pub async fn delete_reservation(&mut self, reservation_id: ReservationId) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM reservations WHERE id = ?")
            .bind(reservation_id.0)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("reservation"));
        }
        Ok(())
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Number of reservations visible inside this transaction.
    #[cfg(test)]
    pub(crate) async fn reservation_count(&mut self) -> StoreResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM reservations")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }
}
