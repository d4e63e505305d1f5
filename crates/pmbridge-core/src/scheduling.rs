//! Appointment conflict resolution.
//!
//! [`resolve`] is a pure function over a snapshot of existing bookings. It does
//! not fetch or lock anything; a booking that races in after the snapshot was
//! taken is not detected here.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::{Duration, PrimitiveDateTime};

/// Upper bound on forward shifts before a booking is rejected.
pub const DEFAULT_MAX_SHIFTS: u32 = 48;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("No free slot found after {attempts} shifts")]
    NoAvailableSlot { attempts: u32 },

    #[error("Invalid date-time '{0}'")]
    InvalidDateTime(String),
}

/// Half-open interval `[start, end)` in practice-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
}

impl TimeSlot {
    pub fn new(start: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<Self, SchedulingError> {
        if end <= start {
            return Err(SchedulingError::InvalidSlot(format!(
                "end {end} is not after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn shifted_by(self, by: Duration) -> Self {
        Self {
            start: self.start + by,
            end: self.end + by,
        }
    }
}

/// A booked or proposed appointment for a provider and/or resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub provider_id: Option<String>,
    pub resource_id: Option<String>,
    pub slot: TimeSlot,
}

impl Booking {
    pub fn for_provider(provider_id: impl Into<String>, slot: TimeSlot) -> Self {
        Self {
            provider_id: Some(provider_id.into()),
            resource_id: None,
            slot,
        }
    }

    fn shares_assignee(&self, other: &Booking) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(a), Some(b)) if a == b);
        same(&self.provider_id, &other.provider_id) || same(&self.resource_id, &other.resource_id)
    }

    fn conflicts_with(&self, slot: &TimeSlot, other: &Booking) -> bool {
        self.shares_assignee(other) && slot.overlaps(&other.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Proposed,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub slot: TimeSlot,
    pub shifted: bool,
    pub shifts: u32,
    pub state: SlotState,
}

/// Finds the first conflict-free slot for `candidate`.
///
/// On conflict the candidate moves forward by its own duration and is checked
/// again against the whole snapshot, at most `max_shifts` times.
pub fn resolve(
    candidate: &Booking,
    existing: &[Booking],
    max_shifts: u32,
) -> Result<Resolution, SchedulingError> {
    let step = candidate.slot.duration();
    if step <= Duration::ZERO {
        return Err(SchedulingError::InvalidSlot("empty duration".into()));
    }

    let mut proposal = Resolution {
        slot: candidate.slot,
        shifted: false,
        shifts: 0,
        state: SlotState::Proposed,
    };

    loop {
        let conflict = existing
            .iter()
            .any(|booked| candidate.conflicts_with(&proposal.slot, booked));

        if !conflict {
            proposal.state = SlotState::Confirmed;
            proposal.shifted = proposal.shifts > 0;
            return Ok(proposal);
        }
        if proposal.shifts >= max_shifts {
            return Err(SchedulingError::NoAvailableSlot {
                attempts: proposal.shifts,
            });
        }

        proposal.slot = proposal.slot.shifted_by(step);
        proposal.shifts += 1;
    }
}

/// Parses the remote service's timestamps into practice-local time.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS` (or a space separator) followed by optional
/// fractional seconds and an optional `Z`/offset suffix, which is ignored.
pub fn parse_remote_datetime(value: &str) -> Result<PrimitiveDateTime, SchedulingError> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let head = value
        .trim()
        .get(..19)
        .ok_or_else(|| SchedulingError::InvalidDateTime(value.to_string()))?
        .replacen(' ', "T", 1);
    PrimitiveDateTime::parse(&head, format)
        .map_err(|_| SchedulingError::InvalidDateTime(value.to_string()))
}

/// Formats a timestamp the way the remote service expects it in requests.
pub fn format_remote_datetime(value: PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    value
        .format(format)
        .unwrap_or_else(|_| value.to_string())
}
