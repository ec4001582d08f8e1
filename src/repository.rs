//! Keeps stored alarms and native schedules in step.
//!
//! Every mutation writes the store first and talks to the native scheduler
//! second. When the store step fails nothing else happens. When the scheduler
//! step fails the record is left as written and the caller gets a
//! `PartiallyPersisted` / `PartiallyDeleted` error so it can retry only the
//! scheduling half ([`AlarmRepository::reschedule`],
//! [`AlarmRepository::retry_cancel`], [`AlarmRepository::reconcile`]).
//!
//! Nothing read from the store is cached between calls.

use std::{
    collections::HashMap,
    future::Future,
    sync::{mpsc::Sender, Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    alarm::{Alarm, AlarmDraft, AlarmPatch},
    communication::{notify, Message, MessageType},
    config::Timeouts,
    error::{AlarmError, Result, SchedulerError, StoreError},
    id::{parse_keys, IdAllocator},
    scheduler::NativeScheduler,
    store::KeyStore,
};

/// Outcome of a [`AlarmRepository::reconcile`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// enabled alarms (re)registered with the scheduler
    pub scheduled: Vec<u64>,
    /// disabled alarms whose triggers were cancelled
    pub cancelled: Vec<u64>,
    pub failed: Vec<SchedulerError>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AlarmRepository {
    store: Arc<dyn KeyStore>,
    scheduler: Arc<dyn NativeScheduler>,
    ids: IdAllocator,
    timeouts: Timeouts,
    /// held from id allocation until the new record is written
    create_lock: AsyncMutex<()>,
    /// one lock per alarm id so operations on the same alarm never overlap
    id_locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
    sender: Option<Sender<Message>>,
}

impl AlarmRepository {
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, scheduler: Arc<dyn NativeScheduler>) -> Self {
        Self {
            ids: IdAllocator::new(Arc::clone(&store)),
            store,
            scheduler,
            timeouts: Timeouts::default(),
            create_lock: AsyncMutex::new(()),
            id_locks: Mutex::new(HashMap::new()),
            sender: None,
        }
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// `sender` gets a [`Message`] after every change
    #[must_use]
    pub fn with_sender(mut self, sender: Sender<Message>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Saves a new alarm and registers it with the native scheduler.
    ///
    /// The alarm is enabled and gets the next unused id.
    ///
    /// # Errors
    ///
    /// `Validation` if the draft is incomplete (the store is not touched),
    /// `StoreUnavailable`/`CorruptKey` if no id could be allocated,
    /// `StoreWriteFailed` if the record could not be written (nothing is
    /// scheduled) and `PartiallyPersisted` if the record was written but the
    /// scheduler refused it.
    pub async fn create(&self, draft: AlarmDraft) -> Result<Alarm> {
        draft.validate()?;

        let create_guard = self.create_lock.lock().await;
        let id = tokio::time::timeout(self.timeouts.store(), self.ids.next_id())
            .await
            .unwrap_or(Err(AlarmError::StoreUnavailable(StoreError::Timeout)))?;
        let alarm = draft.into_alarm(id)?;
        let _id_guard = self.lock_id(id).await;

        self.write(&alarm).await?;
        self.ids.mark_issued(id);
        drop(create_guard);
        log::debug!("stored new alarm {alarm}");

        if let Err(source) = self
            .scheduler_call(
                self.scheduler
                    .create_alarm(id, alarm.hour, alarm.minute, alarm.days),
                move || SchedulerError::RegistrationFailed {
                    id,
                    reason: "timed out".to_string(),
                },
            )
            .await
        {
            return Err(self.diverged_write(alarm, source));
        }

        log::info!("created alarm {alarm}");
        notify(self.sender.as_ref(), MessageType::Created, id);
        Ok(alarm)
    }

    /// Replaces the patched fields of alarm `id` and updates its schedule.
    ///
    /// A disabled alarm has its native triggers cancelled instead of updated.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such alarm, `Validation` if the patched time
    /// is out of range, `StoreWriteFailed` if the write failed (the schedule
    /// is untouched) and `PartiallyPersisted` if the write went through but
    /// the scheduler call did not.
    pub async fn update(&self, id: u64, patch: AlarmPatch) -> Result<Alarm> {
        let _guard = self.lock_id(id).await;
        let current = self.read(id).await?.ok_or(AlarmError::NotFound(id))?;
        let alarm = patch.apply(&current);
        alarm.validate()?;

        self.write(&alarm).await?;
        log::debug!("stored alarm {alarm}");

        // nothing is registered for an alarm that was already off
        if alarm.enabled || current.enabled {
            if let Err(source) = self.sync_schedule(&alarm).await {
                return Err(self.diverged_write(alarm, source));
            }
        }

        log::info!("updated alarm {alarm}");
        notify(self.sender.as_ref(), MessageType::Updated, id);
        Ok(alarm)
    }

    /// Turns an alarm on or off.
    pub async fn set_enabled(&self, id: u64, enabled: bool) -> Result<Alarm> {
        self.update(id, AlarmPatch::new().enabled(enabled)).await
    }

    /// Removes alarm `id` from the store, then cancels its native triggers.
    ///
    /// Deleting an id that is not stored still cancels it, so calling this
    /// again after a `PartiallyDeleted` retries the cancel.
    ///
    /// # Errors
    ///
    /// `StoreDeleteFailed` if the record could not be removed (nothing is
    /// cancelled) and `PartiallyDeleted` if the record is gone but the cancel
    /// failed.
    pub async fn delete(&self, id: u64) -> Result<()> {
        let guard = self.lock_id(id).await;
        self.ids.mark_issued(id);
        let key = id.to_string();
        self.store_call(self.store.remove_item(&key))
            .await
            .map_err(|source| AlarmError::StoreDeleteFailed { id, source })?;
        log::debug!("removed alarm {id} from store");

        let cancelled = self.cancel(id).await;
        drop(guard);
        self.release_id(id);

        if let Err(source) = cancelled {
            log::warn!("alarm {id} deleted but its native triggers may remain: {source}");
            notify(
                self.sender.as_ref(),
                MessageType::Diverged {
                    reason: source.to_string(),
                },
                id,
            );
            return Err(AlarmError::PartiallyDeleted { id, source });
        }

        log::info!("deleted alarm {id}");
        notify(self.sender.as_ref(), MessageType::Deleted, id);
        Ok(())
    }

    pub async fn get(&self, id: u64) -> Result<Alarm> {
        self.read(id).await?.ok_or(AlarmError::NotFound(id))
    }

    /// Every stored alarm, ordered by id.
    pub async fn list(&self) -> Result<Vec<Alarm>> {
        let keys = self
            .store_call(self.store.get_all_keys())
            .await
            .map_err(AlarmError::StoreUnavailable)?;
        let mut ids = parse_keys(&keys)?;
        ids.sort_unstable();

        let mut alarms = Vec::with_capacity(ids.len());
        for id in ids {
            // deleted since the listing
            if let Some(alarm) = self.read(id).await? {
                alarms.push(alarm);
            }
        }
        Ok(alarms)
    }

    /// Retries only the scheduling half for a stored alarm, e.g. after
    /// `PartiallyPersisted`.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no record, `Scheduler` if the retry failed too.
    pub async fn reschedule(&self, id: u64) -> Result<Alarm> {
        let _guard = self.lock_id(id).await;
        let alarm = self.read(id).await?.ok_or(AlarmError::NotFound(id))?;
        self.sync_schedule(&alarm).await?;
        log::info!("rescheduled alarm {alarm}");
        notify(self.sender.as_ref(), MessageType::Updated, id);
        Ok(alarm)
    }

    /// Retries the cancel after a `PartiallyDeleted`.
    ///
    /// # Errors
    ///
    /// `StillPersisted` if `id` has a record, since cancelling it would leave
    /// a stored alarm that never rings. `Scheduler` if the cancel failed again.
    pub async fn retry_cancel(&self, id: u64) -> Result<()> {
        let guard = self.lock_id(id).await;
        if self.read(id).await?.is_some() {
            log::error!("refusing to cancel triggers of stored alarm {id}");
            return Err(AlarmError::StillPersisted(id));
        }
        self.cancel(id).await?;
        drop(guard);
        self.release_id(id);
        log::info!("cancelled leftover triggers of alarm {id}");
        notify(self.sender.as_ref(), MessageType::Deleted, id);
        Ok(())
    }

    /// Brings the native scheduler in line with the store: every enabled
    /// alarm is registered again and every disabled one cancelled.
    ///
    /// Scheduler failures are collected in the report; only failing to read
    /// the store aborts the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for listed in self.list().await? {
            let _guard = self.lock_id(listed.id).await;
            // may have changed while we waited for the lock
            let Some(alarm) = self.read(listed.id).await? else {
                continue;
            };
            match self.sync_schedule(&alarm).await {
                Ok(()) if alarm.enabled => report.scheduled.push(alarm.id),
                Ok(()) => report.cancelled.push(alarm.id),
                Err(e) => {
                    log::warn!("reconcile: {e}");
                    report.failed.push(e);
                }
            }
        }
        log::info!(
            "reconciled {} scheduled, {} cancelled, {} failed",
            report.scheduled.len(),
            report.cancelled.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn read(&self, id: u64) -> Result<Option<Alarm>> {
        let key = id.to_string();
        let Some(value) = self
            .store_call(self.store.get_item(&key))
            .await
            .map_err(AlarmError::StoreUnavailable)?
        else {
            return Ok(None);
        };

        let corrupt = |reason: String| {
            log::error!("stored alarm {key} is corrupt: {reason}");
            AlarmError::CorruptRecord {
                key: key.clone(),
                reason,
            }
        };
        let alarm: Alarm = serde_json::from_str(&value).map_err(|e| corrupt(e.to_string()))?;
        if alarm.id != id {
            return Err(corrupt(format!("record carries id {}", alarm.id)));
        }
        alarm.validate().map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(alarm))
    }

    async fn write(&self, alarm: &Alarm) -> Result<()> {
        let id = alarm.id;
        let value = serde_json::to_string(alarm).map_err(|e| AlarmError::StoreWriteFailed {
            id,
            source: StoreError::Backend(e.to_string()),
        })?;
        let key = alarm.key();
        self.store_call(self.store.set_item(&key, &value))
            .await
            .map_err(|source| AlarmError::StoreWriteFailed { id, source })?;
        Ok(())
    }

    async fn sync_schedule(&self, alarm: &Alarm) -> std::result::Result<(), SchedulerError> {
        if !alarm.enabled {
            return self.cancel(alarm.id).await;
        }
        let id = alarm.id;
        self.scheduler_call(
            self.scheduler
                .update_alarm(id, alarm.hour, alarm.minute, alarm.days),
            move || SchedulerError::RegistrationFailed {
                id,
                reason: "timed out".to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn cancel(&self, id: u64) -> std::result::Result<(), SchedulerError> {
        self.scheduler_call(self.scheduler.cancel_alarm(id), move || {
            SchedulerError::CancelFailed {
                id,
                reason: "timed out".to_string(),
            }
        })
        .await?;
        Ok(())
    }

    fn diverged_write(&self, alarm: Alarm, source: SchedulerError) -> AlarmError {
        log::warn!("alarm {} saved but native scheduling failed: {source}", alarm.id);
        notify(
            self.sender.as_ref(),
            MessageType::Diverged {
                reason: source.to_string(),
            },
            alarm.id,
        );
        AlarmError::PartiallyPersisted { alarm, source }
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        tokio::time::timeout(self.timeouts.store(), call)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    async fn scheduler_call(
        &self,
        call: impl Future<Output = std::result::Result<(), SchedulerError>>,
        on_timeout: impl FnOnce() -> SchedulerError,
    ) -> std::result::Result<(), SchedulerError> {
        tokio::time::timeout(self.timeouts.scheduler(), call)
            .await
            .unwrap_or_else(|_| Err(on_timeout()))
    }

    async fn lock_id(&self, id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Forgets the lock of a deleted id unless someone is waiting on it.
    fn release_id(&self, id: u64) {
        let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        alarm::{AlarmSound, AlarmType, Days},
        scheduler::{InMemoryScheduler, SchedulerOp},
        store::MemoryKeyStore,
    };

    fn draft() -> AlarmDraft {
        AlarmDraft {
            kind: Some(AlarmType::Payment),
            sound: Some(AlarmSound::Siren),
            hour: 6,
            minute: 45,
            days: Days::WEEKDAYS,
            time_confirmed: true,
        }
    }

    /// a scheduler that never answers
    struct HangingScheduler;

    #[async_trait]
    impl NativeScheduler for HangingScheduler {
        async fn create_alarm(
            &self,
            _id: u64,
            _hour: u8,
            _minute: u8,
            _days: Days,
        ) -> std::result::Result<(), SchedulerError> {
            std::future::pending().await
        }

        async fn update_alarm(
            &self,
            _id: u64,
            _hour: u8,
            _minute: u8,
            _days: Days,
        ) -> std::result::Result<(), SchedulerError> {
            std::future::pending().await
        }

        async fn cancel_alarm(&self, _id: u64) -> std::result::Result<(), SchedulerError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn scheduler_timeout_is_a_registration_failure() {
        let store = MemoryKeyStore::new();
        let repo = AlarmRepository::new(Arc::new(store.clone()), Arc::new(HangingScheduler))
            .with_timeouts(Timeouts {
                store_ms: 1000,
                scheduler_ms: 20,
            });
        let err = repo.create(draft()).await.unwrap_err();
        assert!(matches!(
            err,
            AlarmError::PartiallyPersisted {
                source: SchedulerError::RegistrationFailed { id: 0, .. },
                ..
            }
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn disabling_cancels_and_enabling_registers() {
        let scheduler = InMemoryScheduler::new();
        let repo = AlarmRepository::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(scheduler.clone()),
        );
        let alarm = repo.create(draft()).await.unwrap();
        assert!(scheduler.registration(alarm.id).is_some());

        let off = repo.set_enabled(alarm.id, false).await.unwrap();
        assert!(!off.enabled);
        assert!(scheduler.registration(alarm.id).is_none());

        let calls = scheduler.calls().len();
        // already off, nothing to cancel
        repo.update(alarm.id, AlarmPatch::new().minute(0)).await.unwrap();
        assert_eq!(scheduler.calls().len(), calls);

        repo.set_enabled(alarm.id, true).await.unwrap();
        assert_eq!(scheduler.registration(alarm.id).map(|r| r.minute), Some(0));
    }

    #[tokio::test]
    async fn reschedule_after_partial_create() {
        let scheduler = InMemoryScheduler::new();
        scheduler.fail_next(SchedulerOp::Create);
        let repo = AlarmRepository::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(scheduler.clone()),
        );
        let err = repo.create(draft()).await.unwrap_err();
        let alarm = match err {
            AlarmError::PartiallyPersisted { alarm, .. } => alarm,
            other => panic!("expected PartiallyPersisted, got {other:?}"),
        };
        assert!(scheduler.registration(alarm.id).is_none());

        repo.reschedule(alarm.id).await.unwrap();
        assert!(scheduler.registration(alarm.id).is_some());
    }

    #[tokio::test]
    async fn lock_table_is_trimmed_after_delete() {
        let repo = AlarmRepository::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(InMemoryScheduler::new()),
        );
        let alarm = repo.create(draft()).await.unwrap();
        repo.delete(alarm.id).await.unwrap();
        assert!(!repo.id_locks.lock().unwrap().contains_key(&alarm.id));
    }

    #[tokio::test]
    async fn same_id_operations_do_not_overlap() {
        let repo = Arc::new(AlarmRepository::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(InMemoryScheduler::new()),
        ));
        let alarm = repo.create(draft()).await.unwrap();

        let guard = repo.lock_id(alarm.id).await;
        let pending = tokio::spawn({
            let repo = Arc::clone(&repo);
            async move { repo.delete(alarm.id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // delete is still waiting for the lock
        assert!(repo.get(alarm.id).await.is_ok());
        drop(guard);
        pending.await.unwrap().unwrap();
        assert!(matches!(
            repo.get(alarm.id).await,
            Err(AlarmError::NotFound(_))
        ));
    }
}
