use std::sync::Arc;

use getup::{
    AlarmDraft, AlarmPatch, AlarmRepository, AlarmSound, AlarmType, Days, FsKeyStore,
    InMemoryScheduler,
};

fn repo(dir: &std::path::Path, scheduler: &InMemoryScheduler) -> AlarmRepository {
    let store = FsKeyStore::open(dir).unwrap();
    AlarmRepository::new(Arc::new(store), Arc::new(scheduler.clone()))
}

fn draft(hour: u8) -> AlarmDraft {
    AlarmDraft {
        kind: Some(AlarmType::Nfc),
        sound: Some(AlarmSound::Standard),
        hour,
        minute: 0,
        days: Days::WEEKENDS,
        time_confirmed: true,
    }
}

#[tokio::test]
async fn alarms_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = InMemoryScheduler::new();

    let first = repo(dir.path(), &scheduler);
    first.create(draft(6)).await.unwrap();
    first.create(draft(7)).await.unwrap();
    first.update(1, AlarmPatch::new().minute(15)).await.unwrap();
    drop(first);

    let second = repo(dir.path(), &scheduler);
    let alarms = second.list().await.unwrap();
    assert_eq!(alarms.len(), 2);
    assert_eq!(alarms[1].minute, 15);
    assert_eq!(alarms[1].kind, AlarmType::Nfc);
    assert_eq!(second.create(draft(8)).await.unwrap().id, 2);
}

#[tokio::test]
async fn native_state_is_rebuilt_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    repo(dir.path(), &InMemoryScheduler::new())
        .create(draft(6))
        .await
        .unwrap();

    // a fresh scheduler knows nothing, e.g. after a reboot
    let scheduler = InMemoryScheduler::new();
    let report = repo(dir.path(), &scheduler).reconcile().await.unwrap();
    assert_eq!(report.scheduled, vec![0]);
    assert_eq!(scheduler.registration(0).map(|r| r.hour), Some(6));
}

#[tokio::test]
async fn record_file_is_removed_on_delete() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = InMemoryScheduler::new();
    let repo = repo(dir.path(), &scheduler);
    repo.create(draft(6)).await.unwrap();
    assert!(dir.path().join("0.json").exists());

    repo.delete(0).await.unwrap();
    assert!(!dir.path().join("0.json").exists());
    assert!(repo.list().await.unwrap().is_empty());
}
