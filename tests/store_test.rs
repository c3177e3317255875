//! End-to-end behaviour of PetStore over the in-memory and JSON backends.

use std::sync::Arc;
use std::time::Duration;

use petstore::storage::{JsonFileBackend, MemoryBackend, LEADERBOARD_LENGTH_MAX};
use petstore::{
    callback, CompletionQueue, Delivery, LifecycleState, PetData, PetStore, StorageError,
    StoreConfig, SCHEMA_VERSION_CURRENT,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
}

async fn open(backend: &MemoryBackend, config: &mut StoreConfig) -> PetStore {
    init_tracing();
    PetStore::open(Arc::new(backend.clone()), config, Delivery::Direct)
        .await
        .expect("store should open")
}

async fn load(store: &PetStore, owner: &str) -> Vec<PetData> {
    let (on_result, rx) = callback::channel::<Vec<PetData>>();
    store.load(owner, on_result);
    rx.await.expect("load should call back")
}

async fn leaderboard(
    store: &PetStore,
    offset: usize,
    length: usize,
    entity: Option<&str>,
) -> Vec<PetData> {
    let (on_result, rx) = callback::channel::<Vec<PetData>>();
    store.get_pets_leaderboard(offset, length, entity, on_result);
    rx.await.expect("leaderboard should call back")
}

async fn toggle(store: &PetStore, owner: &str, pet: Option<&str>) -> usize {
    let (on_result, rx) = callback::channel::<usize>();
    store.toggle_pets(owner, pet, on_result);
    rx.await.expect("toggle should call back")
}

fn pet_at_level(owner: &str, pet: &str, level: u32) -> PetData {
    PetData::builder(owner, pet, "Wolf").with_level(level).build()
}

// =============================================================================
// Records
// =============================================================================

#[tokio::test]
async fn test_register_then_load() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    let pets = load(&store, "steve").await;

    assert_eq!(pets, vec![PetData::new("steve", "rex", "Wolf")]);
    store.close().await;
}

#[tokio::test]
async fn test_register_is_upsert() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(pet_at_level("steve", "rex", 1));
    store.register_pet(pet_at_level("steve", "rex", 7));
    let pets = load(&store, "steve").await;

    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].level, 7);
    store.close().await;
}

#[tokio::test]
async fn test_load_unknown_owner_is_empty() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    assert!(load(&store, "nobody").await.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.unregister_pet("steve", "rex");
    store.unregister_pet("steve", "rex");

    assert!(load(&store, "steve").await.is_empty());
    assert!(errors.try_recv().is_err(), "deleting twice is not an error");
    store.close().await;
}

#[tokio::test]
async fn test_player_pets_entity_filter() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.register_pet(PetData::new("steve", "tom", "Cat"));
    store.register_pet(PetData::new("alex", "fido", "Wolf"));

    let (on_result, rx) = callback::channel::<Vec<String>>();
    store.get_player_pets("steve", Some("Wolf"), on_result);
    assert_eq!(rx.await.unwrap(), vec!["rex".to_string()]);

    let (on_result, rx) = callback::channel::<Vec<String>>();
    store.get_player_pets("steve", None, on_result);
    let mut names = rx.await.unwrap();
    names.sort();
    assert_eq!(names, vec!["rex".to_string(), "tom".to_string()]);

    store.close().await;
}

#[tokio::test]
async fn test_reads_run_concurrently() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    backend.set_read_delay(Duration::from_millis(200));

    let receivers: Vec<_> = (0..10)
        .map(|_| {
            let (on_result, rx) = callback::channel::<Vec<PetData>>();
            store.load("steve", on_result);
            rx
        })
        .collect();

    // Ten serial reads would take two seconds
    let results = tokio::time::timeout(
        Duration::from_millis(1_500),
        futures::future::join_all(receivers),
    )
    .await
    .expect("reads should overlap");

    for result in results {
        assert_eq!(result.unwrap().len(), 1);
    }
    store.close().await;
}

// =============================================================================
// Leaderboard
// =============================================================================

#[tokio::test]
async fn test_leaderboard_ranks_by_level() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    for (name, level) in [("a", 5), ("b", 3), ("c", 9), ("d", 1)] {
        store.register_pet(pet_at_level("steve", name, level));
    }

    let page = leaderboard(&store, 0, 2, None).await;
    let levels: Vec<u32> = page.iter().map(|p| p.level).collect();
    assert_eq!(levels, vec![9, 5]);

    assert!(leaderboard(&store, 4, 2, None).await.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_leaderboard_long_page_is_capped() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    for i in 0..120u32 {
        store.register_pet(pet_at_level("steve", &format!("pet{i}"), i));
    }

    let page = leaderboard(&store, 0, LEADERBOARD_LENGTH_MAX + 1, None).await;
    assert_eq!(page.len(), LEADERBOARD_LENGTH_MAX);
    assert_eq!(page[0].level, 119);

    assert!(leaderboard(&store, 0, 0, None).await.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_leaderboard_points_break_level_ties() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(
        PetData::builder("steve", "low", "Wolf")
            .with_level(4)
            .with_level_points(10)
            .build(),
    );
    store.register_pet(
        PetData::builder("alex", "high", "Wolf")
            .with_level(4)
            .with_level_points(90)
            .build(),
    );
    store.register_pet(PetData::builder("alex", "cat", "Cat").with_level(8).build());

    let page = leaderboard(&store, 0, 10, Some("Wolf")).await;
    let names: Vec<&str> = page.iter().map(|p| p.pet_name.as_str()).collect();
    assert_eq!(names, vec!["high", "low"]);
    store.close().await;
}

// =============================================================================
// Toggle and rename
// =============================================================================

#[tokio::test]
async fn test_toggle_twice_restores() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.register_pet(PetData::builder("steve", "tom", "Cat").with_visible(false).build());

    assert_eq!(toggle(&store, "steve", None).await, 2);
    let flipped = load(&store, "steve").await;
    assert!(!flipped.iter().find(|p| p.pet_name == "rex").unwrap().visible);
    assert!(flipped.iter().find(|p| p.pet_name == "tom").unwrap().visible);

    assert_eq!(toggle(&store, "steve", None).await, 2);
    let restored = load(&store, "steve").await;
    assert!(restored.iter().find(|p| p.pet_name == "rex").unwrap().visible);
    assert!(!restored.iter().find(|p| p.pet_name == "tom").unwrap().visible);

    store.close().await;
}

#[tokio::test]
async fn test_toggle_single_pet() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.register_pet(PetData::new("steve", "tom", "Cat"));

    assert_eq!(toggle(&store, "steve", Some("rex")).await, 1);
    let pets = load(&store, "steve").await;
    assert!(!pets.iter().find(|p| p.pet_name == "rex").unwrap().visible);
    assert!(pets.iter().find(|p| p.pet_name == "tom").unwrap().visible);

    assert_eq!(toggle(&store, "steve", Some("ghost")).await, 0);
    store.close().await;
}

#[tokio::test]
async fn test_rename_moves_record() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    store.register_pet(pet_at_level("steve", "rex", 6));
    store.update_pet_name("steve", "rex", "max");
    let pets = load(&store, "steve").await;

    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].pet_name, "max");
    assert_eq!(pets[0].level, 6);
    store.close().await;
}

#[tokio::test]
async fn test_rename_onto_existing_reports_duplicate() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.register_pet(PetData::new("steve", "max", "Wolf"));
    store.update_pet_name("steve", "rex", "max");

    let event = errors.recv().await.unwrap();
    assert_eq!(event.op, "update_pet_name");
    assert!(matches!(
        *event.error,
        StorageError::DuplicateIdentity { .. }
    ));

    let mut names: Vec<String> = load(&store, "steve")
        .await
        .into_iter()
        .map(|p| p.pet_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["max".to_string(), "rex".to_string()]);
    store.close().await;
}

#[tokio::test]
async fn test_rename_missing_pet_is_silent() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    store.register_pet(PetData::new("steve", "max", "Wolf"));
    store.update_pet_name("steve", "ghost", "max");

    let pets = load(&store, "steve").await;
    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].pet_name, "max");
    assert!(errors.try_recv().is_err(), "renaming a missing pet is not an error");
    store.close().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_write_failure_goes_to_side_channel() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    backend.fail_writes(true);
    store.register_pet(PetData::new("steve", "rex", "Wolf"));

    let event = errors.recv().await.unwrap();
    assert_eq!(event.op, "register_pet");
    assert_eq!(event.subject.as_deref(), Some("steve/rex"));
    assert!(matches!(*event.error, StorageError::Write(_)));
    store.close().await;
}

#[tokio::test]
async fn test_read_failure_yields_empty_snapshot() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    backend.fail_reads(true);

    assert!(load(&store, "steve").await.is_empty());
    let event = errors.recv().await.unwrap();
    assert_eq!(event.op, "load");
    store.close().await;
}

#[tokio::test]
async fn test_invalid_name_rejected() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();

    store.register_pet(PetData::new("steve", "", "Wolf"));

    let event = errors.recv().await.unwrap();
    assert!(matches!(*event.error, StorageError::InvalidName(_)));
    assert!(backend.is_empty().await);
    store.close().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_hard_reset_wipes_and_clears_flag() {
    let backend = MemoryBackend::new();
    let mut config = StoreConfig::memory();

    let store = open(&backend, &mut config).await;
    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    assert_eq!(load(&store, "steve").await.len(), 1);
    store.close().await;

    config.hard_reset = true;
    let store = open(&backend, &mut config).await;

    assert!(!config.hard_reset);
    assert!(load(&store, "steve").await.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_records_survive_reopen_without_reset() {
    let backend = MemoryBackend::new();
    let mut config = StoreConfig::memory();

    let store = open(&backend, &mut config).await;
    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    store.close().await;

    let store = open(&backend, &mut config).await;
    assert_eq!(load(&store, "steve").await.len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_old_schema_is_patched_forward() {
    let backend = MemoryBackend::with_version("1.0.0");
    let mut config = StoreConfig::memory();

    let store = open(&backend, &mut config).await;

    assert_eq!(backend.migrations_applied().await.len(), 2);
    assert_eq!(config.schema_version.as_deref(), Some(SCHEMA_VERSION_CURRENT));
    store.close().await;

    // Already current: nothing more to apply
    let store = open(&backend, &mut config).await;
    assert_eq!(backend.migrations_applied().await.len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_newer_schema_refuses_to_open() {
    init_tracing();
    let backend = MemoryBackend::with_version("9.0.0");
    let mut config = StoreConfig::memory();

    let result = PetStore::open(Arc::new(backend.clone()), &mut config, Delivery::Direct).await;

    assert!(matches!(result, Err(StorageError::UnsupportedSchema { .. })));
    assert_eq!(backend.close_count().await, 1);
}

#[tokio::test]
async fn test_ops_after_close_never_call_back() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;
    let mut errors = store.subscribe_errors();
    store.close().await;

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    let (on_result, rx) = callback::channel::<usize>();
    store.toggle_pets("steve", None, on_result);

    assert!(rx.await.is_err());
    for _ in 0..2 {
        let event = errors.recv().await.unwrap();
        assert!(matches!(*event.error, StorageError::Closed));
    }
    assert_eq!(store.state(), LifecycleState::Closed);
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_close_waits_for_pending_writes() {
    let backend = MemoryBackend::new();
    let store = open(&backend, &mut StoreConfig::memory()).await;

    for i in 0..50 {
        store.register_pet(PetData::new("steve", format!("pet{i}"), "Wolf"));
    }
    store.close().await;

    assert_eq!(backend.len().await, 50);
    assert_eq!(backend.close_count().await, 1);
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_queued_delivery_runs_on_host_loop() {
    init_tracing();
    let backend = MemoryBackend::new();
    let mut queue = CompletionQueue::new();
    let store = PetStore::open(
        Arc::new(backend.clone()),
        &mut StoreConfig::memory(),
        queue.delivery(),
    )
    .await
    .unwrap();

    store.register_pet(PetData::new("steve", "rex", "Wolf"));
    let (on_result, mut rx) = callback::channel::<Vec<PetData>>();
    store.load("steve", on_result);

    let op = tokio::time::timeout(Duration::from_secs(5), queue.run_next())
        .await
        .expect("completion should arrive");
    assert_eq!(op, Some("load"));
    assert_eq!(rx.try_recv().unwrap().len(), 1);

    store.close().await;
    assert_eq!(queue.run_pending(), 0);
}

// =============================================================================
// JSON backend
// =============================================================================

#[tokio::test]
async fn test_json_store_persists_across_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::default();

    let store = PetStore::open(
        Arc::new(JsonFileBackend::in_dir(dir.path())),
        &mut config,
        Delivery::Direct,
    )
    .await
    .unwrap();
    store.register_pet(pet_at_level("steve", "rex", 3));
    store.update_pet_name("steve", "rex", "max");
    store.close().await;

    let store = PetStore::open(
        Arc::new(JsonFileBackend::in_dir(dir.path())),
        &mut config,
        Delivery::Direct,
    )
    .await
    .unwrap();
    let pets = load(&store, "steve").await;

    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].pet_name, "max");
    assert_eq!(pets[0].level, 3);
    store.close().await;
}
