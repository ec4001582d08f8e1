#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(
    clippy::multiple_crate_versions,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]
//! Alarm persistence and native scheduler synchronization.
//!
//! [`AlarmRepository`] is the only writer of stored alarms and the only
//! caller of the [`NativeScheduler`]. It is built from an injected
//! [`KeyStore`] and [`NativeScheduler`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use getup::{AlarmDraft, AlarmRepository, AlarmSound, AlarmType, Days, InMemoryScheduler, MemoryKeyStore};
//!
//! let repo = AlarmRepository::new(Arc::new(MemoryKeyStore::new()), Arc::new(InMemoryScheduler::new()));
//! let alarm = repo
//!     .create(AlarmDraft {
//!         kind: Some(AlarmType::Standard),
//!         sound: Some(AlarmSound::Radio),
//!         hour: 7,
//!         minute: 30,
//!         days: Days::WEEKDAYS,
//!         time_confirmed: true,
//!     })
//!     .await?;
//! assert_eq!(alarm.id, 0);
//! # Ok(())
//! # }
//! ```

pub mod alarm;
pub mod communication;
pub mod config;
pub mod error;
pub mod id;
pub mod repository;
pub mod scheduler;
pub mod store;
/// weekly trigger planning for the native side
pub mod trigger;

pub use alarm::{Alarm, AlarmDraft, AlarmPatch, AlarmSound, AlarmType, Days};
pub use error::{AlarmError, DraftField, SchedulerError, StoreError, ValidationError};
pub use repository::{AlarmRepository, ReconcileReport};
pub use scheduler::{InMemoryScheduler, NativeScheduler};
pub use store::{FsKeyStore, KeyStore, MemoryKeyStore};
