//! Seat bookkeeping for a single screening.
//!
//! Everything here is pure: functions take the screening as read inside a
//! transaction and return the state that should be written back. Persisting
//! it, and guarding the write against concurrent changes, is the caller's job.

use std::collections::BTreeSet;

use shared::{
    domain::Screening,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("at least one seat must be requested")]
    EmptyRequest,
    #[error("seat labels must not be blank")]
    BlankLabel,
    #[error("seat {0} is requested more than once")]
    DuplicateSeat(String),
    #[error("not enough free seats: requested {requested}, available {available}")]
    InsufficientCapacity { requested: usize, available: i64 },
    #[error("seats already reserved: {}", .0.join(", "))]
    SeatsTaken(Vec<String>),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::EmptyRequest | LedgerError::BlankLabel | LedgerError::DuplicateSeat(_) => {
                ErrorCode::Validation
            }
            LedgerError::InsufficientCapacity { .. } => ErrorCode::InsufficientCapacity,
            LedgerError::SeatsTaken(_) => ErrorCode::SeatAlreadyTaken,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

/// A validated block of seat labels, trimmed and kept in sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatRequest {
    seats: BTreeSet<String>,
}

impl SeatRequest {
    pub fn new<I, S>(labels: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seats = BTreeSet::new();
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() {
                return Err(LedgerError::BlankLabel);
            }
            if !seats.insert(label.to_string()) {
                return Err(LedgerError::DuplicateSeat(label.to_string()));
            }
        }
        if seats.is_empty() {
            return Err(LedgerError::EmptyRequest);
        }
        Ok(Self { seats })
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.seats.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserved {
    /// Screening with the new seat state; `version` is still the one read.
    pub screening: Screening,
    /// Seats granted to this reservation, sorted.
    pub seats: Vec<String>,
}

/// Grants `request` on `screening` or explains why it cannot be granted.
///
/// Capacity is checked before overlap, so a request that is both too large
/// and clashing reports `InsufficientCapacity`.
pub fn reserve(screening: &Screening, request: &SeatRequest) -> Result<Reserved, LedgerError> {
    let requested = request.len();
    if screening.num_of_tickets < screening.num_of_res_tickets + requested as i64 {
        return Err(LedgerError::InsufficientCapacity {
            requested,
            available: screening.available_seats(),
        });
    }

    let taken: BTreeSet<&str> = screening.reserv_seats.iter().map(String::as_str).collect();
    let clashing: Vec<String> = request
        .labels()
        .filter(|label| taken.contains(label))
        .map(str::to_string)
        .collect();
    if !clashing.is_empty() {
        return Err(LedgerError::SeatsTaken(clashing));
    }

    let mut all: BTreeSet<String> = screening.reserv_seats.iter().cloned().collect();
    all.extend(request.labels().map(str::to_string));

    let mut updated = screening.clone();
    updated.reserv_seats = all.into_iter().collect();
    updated.num_of_res_tickets = updated.reserv_seats.len() as i64;

    Ok(Reserved {
        screening: updated,
        seats: request.labels().map(str::to_string).collect(),
    })
}

/// Frees `seats` on `screening`. Labels that are not held are ignored, so
/// releasing twice is the same as releasing once.
pub fn release(screening: &Screening, seats: &[String]) -> Screening {
    let freed: BTreeSet<&str> = seats.iter().map(String::as_str).collect();
    let mut updated = screening.clone();
    updated
        .reserv_seats
        .retain(|label| !freed.contains(label.as_str()));
    updated.num_of_res_tickets = updated.reserv_seats.len() as i64;
    updated
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
