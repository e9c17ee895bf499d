use quiz_core::model::{Category, PendingMutation, ProgressSnapshot, StageKey, UserId};
use quiz_core::time::fixed_now;
use storage::repository::{ProgressCacheRepository, SnapshotRecord, StorageError};
use storage::sqlite::SqliteCache;

fn user(raw: &str) -> UserId {
    UserId::new(raw).unwrap()
}

fn stage(category: Category, index: u8) -> StageKey {
    StageKey::new(category, index).unwrap()
}

#[tokio::test]
async fn sqlite_snapshot_roundtrip() {
    let cache = SqliteCache::open("sqlite:file:memdb_snapshot?mode=memory&cache=shared")
        .await
        .expect("open");

    let uid = user("uid-1");
    assert!(cache.load_snapshot(&uid).await.unwrap().is_none());

    let mut snapshot = ProgressSnapshot::zeroed();
    snapshot
        .apply(&PendingMutation::stage_score(stage(Category::Roadmap, 3), 18))
        .unwrap();
    snapshot.apply(&PendingMutation::unlock(4)).unwrap();

    let record = SnapshotRecord::from_snapshot(&snapshot, fixed_now());
    cache.save_snapshot(&uid, &record).await.unwrap();

    let loaded = cache.load_snapshot(&uid).await.unwrap().expect("record");
    assert_eq!(loaded.updated_at, fixed_now());
    assert_eq!(loaded.into_snapshot().unwrap(), snapshot);

    // second save overwrites, not duplicates
    snapshot
        .apply(&PendingMutation::stage_score(stage(Category::Roadmap, 3), 20))
        .unwrap();
    let record = SnapshotRecord::from_snapshot(&snapshot, fixed_now());
    cache.save_snapshot(&uid, &record).await.unwrap();
    let loaded = cache.load_snapshot(&uid).await.unwrap().expect("record");
    assert_eq!(
        loaded.into_snapshot().unwrap().stage_score(stage(Category::Roadmap, 3)),
        20
    );
}

#[tokio::test]
async fn sqlite_queue_replace_is_ordered_and_atomic() {
    let cache = SqliteCache::open("sqlite:file:memdb_queue?mode=memory&cache=shared")
        .await
        .expect("open");

    let uid = user("uid-1");
    let key = stage(Category::TimeTrial, 5);

    let queue = vec![
        PendingMutation::stage_score(key, 1),
        PendingMutation::stage_score(key, 2),
        PendingMutation::stage_score(key, 3),
    ];
    cache.replace_queue(&uid, &queue).await.unwrap();
    assert_eq!(cache.load_queue(&uid).await.unwrap(), queue);

    // dropping the head keeps the tail in order
    cache.replace_queue(&uid, &queue[1..]).await.unwrap();
    assert_eq!(cache.load_queue(&uid).await.unwrap(), queue[1..]);

    cache.replace_queue(&uid, &[]).await.unwrap();
    assert!(cache.load_queue(&uid).await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_isolates_users() {
    let cache = SqliteCache::open("sqlite:file:memdb_users?mode=memory&cache=shared")
        .await
        .expect("open");

    let alpha = user("alpha");
    let beta = user("beta");

    let record = SnapshotRecord::from_snapshot(&ProgressSnapshot::zeroed(), fixed_now());
    cache.save_snapshot(&alpha, &record).await.unwrap();
    cache
        .replace_queue(&alpha, &[PendingMutation::unlock(2)])
        .await
        .unwrap();

    assert!(cache.load_snapshot(&beta).await.unwrap().is_none());
    assert!(cache.load_queue(&beta).await.unwrap().is_empty());
    assert_eq!(cache.load_queue(&alpha).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_surfaces_corrupt_records() {
    let cache = SqliteCache::open("sqlite:file:memdb_corrupt?mode=memory&cache=shared")
        .await
        .expect("open");

    let uid = user("uid-1");
    sqlx::query("INSERT INTO snapshots (user_id, fields, updated_at) VALUES (?1, ?2, ?3)")
        .bind(uid.as_str())
        .bind("not json")
        .bind(fixed_now())
        .execute(cache.pool())
        .await
        .unwrap();

    let err = cache.load_snapshot(&uid).await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));
}
