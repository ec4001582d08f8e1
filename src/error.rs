//! Error types for alarm persistence and scheduling.
//!
//! Collaborators report [`StoreError`] and [`SchedulerError`]. The repository
//! maps those into stage-specific [`AlarmError`] variants so a caller can tell
//! "nothing happened" apart from "the record and the native schedule diverged".

use std::fmt;

use crate::alarm::Alarm;

/// A field of an [`crate::alarm::AlarmDraft`] that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftField {
    Type,
    Sound,
    Time,
    Hour,
    Minute,
}

impl fmt::Display for DraftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type => "type",
            Self::Sound => "sound",
            Self::Time => "time",
            Self::Hour => "hour",
            Self::Minute => "minute",
        })
    }
}

/// Every field that kept a draft from being saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub fields: Vec<DraftField>,
}

impl ValidationError {
    #[must_use]
    pub fn contains(&self, field: DraftField) -> bool {
        self.fields.contains(&field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
        write!(f, "invalid alarm fields: {}", names.join(", "))
    }
}

impl std::error::Error for ValidationError {}

/// Failure reported by a [`crate::store::KeyStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid store key {0:?}")]
    InvalidKey(String),

    #[error("store error: {0}")]
    Backend(String),

    #[error("store call timed out")]
    Timeout,
}

/// Failure reported by a [`crate::scheduler::NativeScheduler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("native scheduler refused to register alarm {id}: {reason}")]
    RegistrationFailed { id: u64, reason: String },

    #[error("native scheduler failed to cancel alarm {id}: {reason}")]
    CancelFailed { id: u64, reason: String },
}

impl SchedulerError {
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::RegistrationFailed { id, .. } | Self::CancelFailed { id, .. } => *id,
        }
    }
}

/// Errors returned by [`crate::repository::AlarmRepository`].
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// The draft or patch never reached storage.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("alarm {0} not found")]
    NotFound(u64),

    /// Listing or reading the store failed. Nothing was written or scheduled.
    #[error("alarm store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Writing the record failed. No native call was attempted.
    #[error("failed to write alarm {id}: {source}")]
    StoreWriteFailed {
        id: u64,
        #[source]
        source: StoreError,
    },

    /// Removing the record failed. No cancel was attempted.
    #[error("failed to delete alarm {id}: {source}")]
    StoreDeleteFailed {
        id: u64,
        #[source]
        source: StoreError,
    },

    /// A store key that is not a decimal alarm id.
    #[error("store key {0:?} is not an alarm id")]
    CorruptKey(String),

    #[error("stored alarm {key:?} is corrupt: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// A scheduling-only retry failed; the store was not touched.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The record was written but the native schedule does not match it.
    #[error("alarm {} saved but may not ring: {source}", .alarm.id)]
    PartiallyPersisted {
        alarm: Alarm,
        #[source]
        source: SchedulerError,
    },

    /// The record was removed but its native trigger may still fire.
    #[error("alarm {id} deleted but may still ring: {source}")]
    PartiallyDeleted {
        id: u64,
        #[source]
        source: SchedulerError,
    },

    /// A cancel retry was requested for an id that still has a record.
    #[error("alarm {0} is still persisted, refusing to cancel its schedule")]
    StillPersisted(u64),
}

impl AlarmError {
    /// `true` for errors the UI should show as an in-place field prompt.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// `true` when the store holds the user's intent but the native scheduler
    /// does not reflect it, so retrying just the scheduling half is enough.
    #[must_use]
    pub const fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::PartiallyPersisted { .. } | Self::PartiallyDeleted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AlarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_field() {
        let err = ValidationError {
            fields: vec![DraftField::Type, DraftField::Time],
        };
        assert_eq!(err.to_string(), "invalid alarm fields: type, time");
        assert!(err.contains(DraftField::Time));
        assert!(!err.contains(DraftField::Sound));
    }

    #[test]
    fn partially_deleted_is_divergence() {
        let err = AlarmError::PartiallyDeleted {
            id: 3,
            source: SchedulerError::CancelFailed {
                id: 3,
                reason: "gone".into(),
            },
        };
        assert!(err.is_divergence());
        assert!(!err.is_validation());
        assert_eq!(
            err.to_string(),
            "alarm 3 deleted but may still ring: native scheduler failed to cancel alarm 3: gone"
        );
    }

    #[test]
    fn scheduler_error_reports_id() {
        let err = SchedulerError::RegistrationFailed {
            id: 9,
            reason: "denied".into(),
        };
        assert_eq!(err.id(), 9);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AlarmError>();
    }
}
