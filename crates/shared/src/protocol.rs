use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MovieId, Reservation, UserProfile},
    error::ApiError,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a wire date. Only the zero-padded `YYYY-MM-DD` form is accepted.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    let invalid = || ApiError::validation("invalid date format, should be YYYY-MM-DD");
    if raw.len() != 10 {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| invalid())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub username: String,
    pub movie_id: MovieId,
    pub date: String,
    pub time: String,
    pub hall: String,
    pub reserv_seats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCreatedResponse {
    pub message: String,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallRequest {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<String>,
    #[serde(default)]
    pub cols: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieRequest {
    pub title: String,
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub directors: String,
    #[serde(default)]
    pub actors: String,
    #[serde(default)]
    pub screening: Option<NaiveDate>,
    #[serde(default)]
    pub plot: String,
    #[serde(default)]
    pub poster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningSlot {
    pub date: NaiveDate,
    pub time: String,
    pub hall: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetail {
    #[serde(flatten)]
    pub movie: crate::domain::Movie,
    pub screenings: Vec<ScreeningSlot>,
}

/// Body for creating or editing a screening. Seat state is never accepted
/// from clients; only the reservation transaction changes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningRequest {
    pub movie_id: MovieId,
    #[serde(alias = "dateSt")]
    pub date: String,
    pub time: String,
    pub hall: String,
    pub num_of_tickets: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewAccessRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewAccessResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_iso_dates() {
        assert_eq!(
            parse_date("2024-05-17").expect("date"),
            NaiveDate::from_ymd_opt(2024, 5, 17).expect("valid")
        );
        assert!(parse_date("2024-5-17").is_err());
        assert!(parse_date("17.05.2024").is_err());
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn reservation_request_uses_camel_case_fields() {
        let req: CreateReservationRequest = serde_json::from_value(serde_json::json!({
            "username": "ana",
            "movieId": 3,
            "date": "2024-05-17",
            "time": "20:00",
            "hall": "Sala 1",
            "reservSeats": ["B2", "B1"],
        }))
        .expect("request");
        assert_eq!(req.movie_id, MovieId(3));
        assert_eq!(req.reserv_seats, vec!["B2", "B1"]);
    }
}
