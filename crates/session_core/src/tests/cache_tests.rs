use super::*;
use std::sync::atomic::AtomicUsize;

use modeling_engine::ScriptedEngine;

struct Factory {
    created: Arc<AtomicUsize>,
    engines: Arc<std::sync::Mutex<Vec<Arc<ScriptedEngine>>>>,
}

fn cache() -> (EngineCache, Factory) {
    let created = Arc::new(AtomicUsize::new(0));
    let engines = Arc::new(std::sync::Mutex::new(Vec::new()));
    let factory = Factory {
        created: created.clone(),
        engines: engines.clone(),
    };
    let cache = EngineCache::new(move |_tab| {
        created.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::new(ScriptedEngine::new());
        engines.lock().expect("engines").push(engine.clone());
        engine as Arc<dyn ModelingEngine>
    });
    (cache, factory)
}

#[tokio::test]
async fn entries_are_created_once_per_tab() {
    let (cache, factory) = cache();

    assert!(cache.get(TabId(7)).await.is_none());
    let first = cache.entry(TabId(7)).await;
    let again = cache.entry(TabId(7)).await;
    let other = cache.entry(TabId(3)).await;

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(first.tab(), TabId(7));
    assert_eq!(cache.open_tabs().await, vec![TabId(3), TabId(7)]);
}

#[tokio::test]
async fn close_tab_destroys_engine_exactly_once() {
    let (cache, factory) = cache();
    let entry = cache.entry(TabId(1)).await;
    let before = entry.generation();

    assert!(cache.close_tab(TabId(1)).await);
    assert!(!cache.close_tab(TabId(1)).await);
    assert!(!entry.destroy());

    let engines = factory.engines.lock().expect("engines");
    assert_eq!(engines[0].destroy_calls(), 1);
    assert!(entry.is_destroyed());
    assert!(entry.generation() > before);
    assert!(cache.get(TabId(1)).await.is_none());
}

#[tokio::test]
async fn reopening_a_closed_tab_builds_a_new_engine() {
    let (cache, factory) = cache();
    let first = cache.entry(TabId(1)).await;
    cache.close_tab(TabId(1)).await;

    let second = cache.entry(TabId(1)).await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_destroyed());
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slot_starts_empty() {
    let engine: Arc<dyn ModelingEngine> = Arc::new(ScriptedEngine::new());
    let entry = CacheEntry::new(TabId(2), engine);

    assert!(entry.last_imported().await.is_none());
    assert!(entry.active_view().await.is_none());
    assert!(entry.views().await.is_empty());
    assert_eq!(entry.generation(), 0);
    assert_eq!(entry.advance_generation(), 1);
}
