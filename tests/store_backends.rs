//! Runs against live backends. Set `COUNTERSIGN_TEST_MYSQL_DSN` or
//! `COUNTERSIGN_TEST_REDIS_DSN` and pass `--ignored`.

use chrono::{Duration as ChronoDuration, Utc};
use countersign::domain_model::*;
use countersign::domain_port::*;
use countersign::infra_mysql::MySqlSessionStore;
use countersign::infra_redis::RedisSessionStore;
use futures_util::future::join_all;
use serde_json::json;
use sqlx::MySqlPool;
use std::sync::Arc;
use uuid::Uuid;

const RACERS: usize = 16;

fn session_for(user: &UserId) -> Session {
    Session::new(
        user.clone(),
        json!({}),
        json!({}),
        Utc::now() + ChronoDuration::hours(1),
    )
}

async fn mysql_store() -> Option<Arc<MySqlSessionStore>> {
    let dsn = std::env::var("COUNTERSIGN_TEST_MYSQL_DSN").ok()?;
    let pool = MySqlPool::connect(&dsn).await.unwrap();
    sqlx::query(include_str!("../sql/session_info.sql"))
        .execute(&pool)
        .await
        .unwrap();
    Some(Arc::new(MySqlSessionStore::new(pool)))
}

async fn redis_store() -> Option<Arc<RedisSessionStore>> {
    let dsn = std::env::var("COUNTERSIGN_TEST_REDIS_DSN").ok()?;
    let manager = redis::Client::open(dsn)
        .unwrap()
        .get_connection_manager()
        .await
        .unwrap();
    Some(Arc::new(RedisSessionStore::new(
        manager,
        format!("countersign-test-{}", Uuid::new_v4()),
    )))
}

/// Every racer presents generation 0; exactly one may win.
async fn assert_single_winner(store: Arc<dyn SessionStore>) {
    let session = session_for(&UserId(Uuid::new_v4().to_string()));
    store.insert(&session).await.unwrap();

    let expires_at = Utc::now() + ChronoDuration::hours(2);
    let racers = (0..RACERS).map(|_| {
        let store = store.clone();
        let handle = session.handle.clone();
        tokio::spawn(async move {
            store
                .advance_generation(&handle, Generation(0), expires_at)
                .await
        })
    });
    let outcomes: Vec<_> = join_all(racers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, GenerationAdvance::Advanced(s) if s.refresh_generation == Generation(1)))
        .count();
    let stale = outcomes
        .iter()
        .filter(|o| matches!(o, GenerationAdvance::Stale { current } if *current == Generation(1)))
        .count();
    assert_eq!(advanced, 1);
    assert_eq!(stale, RACERS - 1);

    let stored = store.get(&session.handle).await.unwrap().unwrap();
    assert_eq!(stored.refresh_generation, Generation(1));
    assert_eq!(stored.expires_at.timestamp(), expires_at.timestamp());
    store.delete(&session.handle).await.unwrap();
}

/// Sessions inserted while a bulk revoke is in flight must stay indexed.
async fn assert_bulk_revoke_keeps_new_sessions(store: Arc<dyn SessionStore>) {
    let user = UserId(Uuid::new_v4().to_string());
    for _ in 0..20 {
        store.insert(&session_for(&user)).await.unwrap();
        let newcomer = session_for(&user);

        let revoke = {
            let store = store.clone();
            let user = user.clone();
            tokio::spawn(async move { store.delete_for_user(&user).await })
        };
        let insert = {
            let store = store.clone();
            let newcomer = newcomer.clone();
            tokio::spawn(async move { store.insert(&newcomer).await })
        };
        revoke.await.unwrap().unwrap();
        insert.await.unwrap().unwrap();

        if store.get(&newcomer.handle).await.unwrap().is_some() {
            let listed = store.list_handles(&user).await.unwrap();
            assert!(listed.contains(&newcomer.handle));
        }
        store.delete_for_user(&user).await.unwrap();
    }
}

async fn assert_expired_sessions_vanish(store: Arc<dyn SessionStore>) {
    let user = UserId(Uuid::new_v4().to_string());
    let session = Session::new(
        user.clone(),
        json!({}),
        json!({}),
        Utc::now() + ChronoDuration::seconds(1),
    );
    store.insert(&session).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    assert!(store.get(&session.handle).await.unwrap().is_none());
    assert!(store.list_handles(&user).await.unwrap().is_empty());
    store.prune_expired(Utc::now()).await.unwrap();
    assert!(matches!(
        store
            .advance_generation(&session.handle, Generation(0), Utc::now())
            .await
            .unwrap(),
        GenerationAdvance::NotFound
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn mysql_concurrent_advance_has_one_winner() {
    let Some(store) = mysql_store().await else {
        return;
    };
    assert_single_winner(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn mysql_expired_sessions_vanish() {
    let Some(store) = mysql_store().await else {
        return;
    };
    assert_expired_sessions_vanish(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn redis_concurrent_advance_has_one_winner() {
    let Some(store) = redis_store().await else {
        return;
    };
    assert_single_winner(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn redis_bulk_revoke_keeps_concurrent_sessions() {
    let Some(store) = redis_store().await else {
        return;
    };
    assert_bulk_revoke_keeps_new_sessions(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn redis_expired_sessions_vanish() {
    let Some(store) = redis_store().await else {
        return;
    };
    assert_expired_sessions_vanish(store).await;
}
