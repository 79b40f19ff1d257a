use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(HallId);
id_newtype!(MovieId);
id_newtype!(ScreeningId);
id_newtype!(ReservationId);

pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hall {
    pub id: HallId,
    pub name: String,
    pub rows: Vec<String>,
    pub cols: Vec<i32>,
    #[serde(rename = "creation_date")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub duration: i32,
    pub genre: String,
    pub directors: String,
    pub actors: String,
    /// Premiere date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screening: Option<NaiveDate>,
    pub plot: String,
    pub poster: String,
    #[serde(rename = "creation_date")]
    pub created_at: DateTime<Utc>,
}

/// One scheduled showing ("repertoire") of a movie in a hall.
///
/// `reserv_seats` is the source of truth for which seats are taken and is kept
/// sorted; `num_of_res_tickets` always equals its length once a transaction
/// has committed. `version` increases on every seat-state write and is what
/// concurrent writers compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screening {
    pub id: ScreeningId,
    pub movie_id: MovieId,
    pub date: NaiveDate,
    pub time: String,
    pub hall: String,
    pub num_of_tickets: i64,
    pub num_of_res_tickets: i64,
    pub reserv_seats: Vec<String>,
    pub version: i64,
    #[serde(rename = "creationDate")]
    pub created_at: DateTime<Utc>,
}

impl Screening {
    pub fn available_seats(&self) -> i64 {
        (self.num_of_tickets - self.num_of_res_tickets).max(0)
    }
}

/// A user's block of seats for one screening.
///
/// Movie title, date, time and hall are copied from the movie and screening
/// when the reservation is created and are never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub username: String,
    pub user_id: UserId,
    pub movie_id: MovieId,
    #[serde(rename = "repertoiresId")]
    pub screening_id: ScreeningId,
    pub movie_title: String,
    pub date: NaiveDate,
    pub time: String,
    pub hall: String,
    #[serde(rename = "creationDate")]
    pub created_at: DateTime<Utc>,
    pub reserv_seats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<String>,
    #[serde(rename = "creation_date")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "update_date")]
    pub updated_at: DateTime<Utc>,
}

pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
