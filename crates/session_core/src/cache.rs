//! Per-tab engine ownership that outlives mounts of the editor surface.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use modeling_engine::{ModelingEngine, Sheet};
use shared::domain::TabId;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

type EngineFactory = dyn Fn(TabId) -> Arc<dyn ModelingEngine> + Send + Sync;

#[derive(Default)]
pub(crate) struct CachedView {
    pub(crate) active_view: Option<Sheet>,
    pub(crate) views: Vec<Sheet>,
    pub(crate) last_imported: Option<String>,
}

/// Holds the single engine instance of one tab together with the view
/// pointer and the last imported text.
pub struct CacheEntry {
    tab: TabId,
    engine: Arc<dyn ModelingEngine>,
    generation: AtomicU64,
    destroyed: AtomicBool,
    slot: Mutex<CachedView>,
}

impl CacheEntry {
    pub fn new(tab: TabId, engine: Arc<dyn ModelingEngine>) -> Self {
        Self {
            tab,
            engine,
            generation: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            slot: Mutex::new(CachedView::default()),
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn engine(&self) -> Arc<dyn ModelingEngine> {
        Arc::clone(&self.engine)
    }

    /// Current mount generation. Asynchronous completions compare the value
    /// captured at their start against this before applying effects.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub async fn last_imported(&self) -> Option<String> {
        self.slot.lock().await.last_imported.clone()
    }

    pub async fn active_view(&self) -> Option<Sheet> {
        self.slot.lock().await.active_view.clone()
    }

    pub async fn views(&self) -> Vec<Sheet> {
        self.slot.lock().await.views.clone()
    }

    pub(crate) async fn lock_slot(&self) -> MutexGuard<'_, CachedView> {
        self.slot.lock().await
    }

    /// Tears the engine down. Only the first call has an effect; later calls
    /// return `false`.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.advance_generation();
        self.engine.destroy();
        info!(tab = self.tab.0, generation, "cache: engine destroyed");
        true
    }
}

/// Tab-keyed registry of [`CacheEntry`] values. Engines are created lazily on
/// first use of a tab.
pub struct EngineCache {
    factory: Box<EngineFactory>,
    entries: RwLock<HashMap<TabId, Arc<CacheEntry>>>,
}

impl EngineCache {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(TabId) -> Arc<dyn ModelingEngine> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn entry(&self, tab: TabId) -> Arc<CacheEntry> {
        if let Some(entry) = self.entries.read().await.get(&tab) {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().await;
        let entry = entries.entry(tab).or_insert_with(|| {
            debug!(tab = tab.0, "cache: creating engine");
            Arc::new(CacheEntry::new(tab, (self.factory)(tab)))
        });
        Arc::clone(entry)
    }

    pub async fn get(&self, tab: TabId) -> Option<Arc<CacheEntry>> {
        self.entries.read().await.get(&tab).cloned()
    }

    pub async fn open_tabs(&self) -> Vec<TabId> {
        let mut tabs = self.entries.read().await.keys().copied().collect::<Vec<_>>();
        tabs.sort_by_key(|tab| tab.0);
        tabs
    }

    /// Removes the tab's entry and destroys its engine. Returns `false` when
    /// the tab had no live entry.
    pub async fn close_tab(&self, tab: TabId) -> bool {
        let entry = self.entries.write().await.remove(&tab);
        match entry {
            Some(entry) => entry.destroy(),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
