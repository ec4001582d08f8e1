//! The OS alarm facility, seen from the repository.
//!
//! A [`NativeScheduler`] keys its registrations by the application-assigned
//! alarm id. `create_alarm` and `update_alarm` both register-or-replace the
//! triggers for that id; `cancel_alarm` drops them.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{alarm::Days, error::SchedulerError, trigger::TriggerPlan};

#[async_trait]
pub trait NativeScheduler: Send + Sync {
    async fn create_alarm(
        &self,
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    ) -> Result<(), SchedulerError>;

    async fn update_alarm(
        &self,
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    ) -> Result<(), SchedulerError>;

    async fn cancel_alarm(&self, id: u64) -> Result<(), SchedulerError>;
}

/// One call made against a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCall {
    Create {
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    },
    Update {
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    },
    Cancel {
        id: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOp {
    Create,
    Update,
    Cancel,
}

/// What the scheduler currently has registered for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub hour: u8,
    pub minute: u8,
    pub days: Days,
}

#[derive(Debug, Default)]
struct Table {
    registered: BTreeMap<u64, Registration>,
    calls: Vec<SchedulerCall>,
    failures: VecDeque<SchedulerOp>,
    strict_cancel: bool,
}

/// A scheduler that keeps its table in memory and logs the trigger plan of
/// each registration.
///
/// Failures can be queued with [`InMemoryScheduler::fail_next`]; the next
/// call of that kind fails and leaves the table untouched.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduler {
    table: Arc<Mutex<Table>>,
}

impl InMemoryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `cancel_alarm` fail for ids with nothing registered, the way a
    /// platform that refuses to cancel an unknown alarm would.
    #[must_use]
    pub fn strict_cancel(self) -> Self {
        self.lock().strict_cancel = true;
        self
    }

    pub fn fail_next(&self, op: SchedulerOp) {
        self.lock().failures.push_back(op);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn registration(&self, id: u64) -> Option<Registration> {
        self.lock().registered.get(&id).copied()
    }

    #[must_use]
    pub fn registered_ids(&self) -> Vec<u64> {
        self.lock().registered.keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn take_failure(table: &mut Table, op: SchedulerOp) -> bool {
        if let Some(pos) = table.failures.iter().position(|f| *f == op) {
            table.failures.remove(pos);
            true
        } else {
            false
        }
    }

    fn register(
        &self,
        op: SchedulerOp,
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    ) -> Result<(), SchedulerError> {
        let mut table = self.lock();
        table.calls.push(match op {
            SchedulerOp::Create => SchedulerCall::Create {
                id,
                hour,
                minute,
                days,
            },
            _ => SchedulerCall::Update {
                id,
                hour,
                minute,
                days,
            },
        });
        if Self::take_failure(&mut table, op) {
            log::warn!("injected registration failure for alarm {id}");
            return Err(SchedulerError::RegistrationFailed {
                id,
                reason: "injected failure".to_string(),
            });
        }
        table
            .registered
            .insert(id, Registration { hour, minute, days });
        drop(table);

        let plan = TriggerPlan::new(id, hour, minute, days, chrono::Local::now().naive_local());
        if let Some(next) = plan.next_fire() {
            log::info!(
                "alarm {id} registered with {} trigger(s), next at {next}",
                plan.triggers.len()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl NativeScheduler for InMemoryScheduler {
    async fn create_alarm(
        &self,
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    ) -> Result<(), SchedulerError> {
        self.register(SchedulerOp::Create, id, hour, minute, days)
    }

    async fn update_alarm(
        &self,
        id: u64,
        hour: u8,
        minute: u8,
        days: Days,
    ) -> Result<(), SchedulerError> {
        self.register(SchedulerOp::Update, id, hour, minute, days)
    }

    async fn cancel_alarm(&self, id: u64) -> Result<(), SchedulerError> {
        let mut table = self.lock();
        table.calls.push(SchedulerCall::Cancel { id });
        if Self::take_failure(&mut table, SchedulerOp::Cancel) {
            log::warn!("injected cancel failure for alarm {id}");
            return Err(SchedulerError::CancelFailed {
                id,
                reason: "injected failure".to_string(),
            });
        }
        if table.registered.remove(&id).is_none() && table.strict_cancel {
            return Err(SchedulerError::CancelFailed {
                id,
                reason: "no alarm registered".to_string(),
            });
        }
        log::info!("alarm {id} cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_replaces_registration() {
        let scheduler = InMemoryScheduler::new();
        scheduler.create_alarm(1, 7, 0, Days::WEEKDAYS).await.unwrap();
        scheduler.update_alarm(1, 8, 15, Days::NONE).await.unwrap();
        assert_eq!(
            scheduler.registration(1),
            Some(Registration {
                hour: 8,
                minute: 15,
                days: Days::NONE
            })
        );
        assert_eq!(scheduler.calls().len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_leaves_table_alone() {
        let scheduler = InMemoryScheduler::new();
        scheduler.fail_next(SchedulerOp::Create);
        let err = scheduler.create_alarm(4, 6, 0, Days::NONE).await.unwrap_err();
        assert_eq!(err.id(), 4);
        assert!(scheduler.registered_ids().is_empty());
        // only the next call fails
        scheduler.create_alarm(4, 6, 0, Days::NONE).await.unwrap();
        assert_eq!(scheduler.registered_ids(), vec![4]);
    }

    #[tokio::test]
    async fn strict_cancel_refuses_unknown_ids() {
        let scheduler = InMemoryScheduler::new().strict_cancel();
        scheduler.create_alarm(2, 6, 0, Days::NONE).await.unwrap();
        scheduler.cancel_alarm(2).await.unwrap();
        assert!(matches!(
            scheduler.cancel_alarm(2).await,
            Err(SchedulerError::CancelFailed { id: 2, .. })
        ));
    }
}
