//! Actor pool lifecycle tests

use std::sync::Arc;
use std::time::Duration;

use keystep_engine::recording::{Recorded, RecordingFactory};
use keystep_engine::{ActorPool, EngineError, Selector, WaitState};

fn pool(factory: &Arc<RecordingFactory>) -> ActorPool {
    ActorPool::new(factory.clone())
}

#[tokio::test]
async fn test_live_session_is_reused() {
    let factory = Arc::new(RecordingFactory::new(["admin"], true));
    let mut pool = pool(&factory);

    let a = pool.acquire("admin").await.unwrap();
    let b = pool.acquire("admin").await.unwrap();

    assert!(a.same_session(&b));
    assert_eq!(a.session_id(), b.session_id());
    assert_eq!(factory.created(), 1);
    assert_eq!(pool.stats().reused, 1);
}

#[tokio::test]
async fn test_dead_session_is_replaced() {
    let factory = Arc::new(RecordingFactory::new(["admin"], true));
    let mut pool = pool(&factory);

    let a = pool.acquire("admin").await.unwrap();
    factory.latest("admin").unwrap().kill();

    let c = pool.acquire("admin").await.unwrap();
    assert!(!a.same_session(&c));
    assert!(c.is_live().await);
    assert_eq!(factory.created(), 2);
    assert_eq!(pool.stats().recreated, 1);
}

#[tokio::test]
async fn test_roles_are_normalised_and_distinct() {
    let factory = Arc::new(RecordingFactory::new(["Student", "teacher"], true));
    let mut pool = pool(&factory);

    let student = pool.acquire(" STUDENT\u{200B}").await.unwrap();
    let again = pool.acquire("student").await.unwrap();
    let teacher = pool.acquire("Teacher").await.unwrap();

    assert_eq!(student.role(), "student");
    assert!(student.same_session(&again));
    assert!(!student.same_session(&teacher));
    assert_eq!(pool.roles().collect::<Vec<_>>(), vec!["student", "teacher"]);
}

#[tokio::test]
async fn test_unknown_role_is_rejected() {
    let factory = Arc::new(RecordingFactory::new(["admin"], true));
    let mut pool = pool(&factory);

    let err = pool.acquire("janitor").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownRole(ref r) if r == "janitor"));
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_creation_failure_propagates_for_that_role_only() {
    let factory = Arc::new(RecordingFactory::new(["admin", "student"], true));
    factory.fail_role("admin");
    let mut pool = pool(&factory);

    let err = pool.acquire("admin").await.unwrap_err();
    assert!(matches!(err, EngineError::SessionCreation { ref role, .. } if role == "admin"));
    assert!(pool.acquire("student").await.is_ok());
}

#[tokio::test]
async fn test_dispose_all_empties_the_pool() {
    let factory = Arc::new(RecordingFactory::new(["admin", "student"], true));
    let mut pool = pool(&factory);

    pool.acquire("admin").await.unwrap();
    pool.acquire("student").await.unwrap();
    factory.latest("student").unwrap().kill();

    assert_eq!(pool.dispose_all().await, 1);
    assert_eq!(pool.roles().count(), 0);
    assert_eq!(
        factory.latest("admin").unwrap().recorded(),
        vec![Recorded::Dispose]
    );

    // a fresh session is created on the next acquire
    pool.acquire("admin").await.unwrap();
    assert_eq!(factory.created(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_gives_up_on_missing_element() {
    let factory = Arc::new(RecordingFactory::new(["admin"], false));
    let mut pool = pool(&factory);
    let actor = pool.acquire("admin").await.unwrap();

    let err = actor
        .require(&Selector::text("Save"), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(ref what) if what.contains("text:Save")));

    let driver = factory.latest("admin").unwrap();
    driver.show(Selector::text("Save"), false);
    let hidden = actor
        .wait_for(&Selector::text("Save"), WaitState::Hidden, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(hidden.is_some());

    driver.show(Selector::text("Save"), true);
    assert!(actor
        .require(&Selector::text("Save"), Duration::from_secs(1))
        .await
        .is_ok());
}
