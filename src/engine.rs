//! The dispatch engine: one explicit value owning every subcomponent.
//!
//! Construction wires stores, locks, the event bus and the three services;
//! `start` spawns the background jobs (hold sweep, push retry worker,
//! fan-out worker, cache purge, timer rehydration) and `shutdown` tears
//! them down, cancelling all timers and draining the push outbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::{CacheStore, MemoryCacheStore};
use crate::config::EngineConfig;
use crate::error::DispatchResult;
use crate::events::{ConnectionManager, EventBus, FanoutWorker, NoopSender, PushOutbox, PushSender};
use crate::hold::{HoldService, HoldStore};
use crate::lock::LockManager;
use crate::match_index::MatchIndex;
use crate::order::OrderService;
use crate::route::RouteProgressService;
use crate::scheduler::Scheduler;
use crate::store::{MemoryStateStore, StateStore};

const PUSH_OUTBOX_CAPACITY: usize = 16_384;
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(30);

pub struct DispatchEngine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    cache: Arc<dyn CacheStore>,
    locks: Arc<LockManager>,
    index: Arc<MatchIndex>,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    orders: Arc<OrderService>,
    holds: Arc<HoldService>,
    routes: Arc<RouteProgressService>,
    outbox: Arc<PushOutbox>,
    push_sender: Arc<dyn PushSender>,
    /// Set when the engine was built on the in-process cache, which needs
    /// a periodic purge job.
    memory_cache: Option<Arc<MemoryCacheStore>>,
    fanout_worker: std::sync::Mutex<Option<FanoutWorker>>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl DispatchEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        cache: Arc<dyn CacheStore>,
        push_sender: Arc<dyn PushSender>,
    ) -> Arc<Self> {
        Self::build(config, store, cache, push_sender, None)
    }

    /// Everything in-process: memory store + memory cache + noop push.
    /// The single-process deployment story, and what the tests drive.
    pub fn in_memory(config: EngineConfig) -> Arc<Self> {
        Self::in_memory_with_push(config, Arc::new(NoopSender))
    }

    /// In-process stores with a real push sender.
    pub fn in_memory_with_push(config: EngineConfig, push_sender: Arc<dyn PushSender>) -> Arc<Self> {
        let cache = Arc::new(MemoryCacheStore::new());
        Self::build(
            config,
            Arc::new(MemoryStateStore::new()),
            cache.clone(),
            push_sender,
            Some(cache),
        )
    }

    fn build(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        cache: Arc<dyn CacheStore>,
        push_sender: Arc<dyn PushSender>,
        memory_cache: Option<Arc<MemoryCacheStore>>,
    ) -> Arc<Self> {
        let locks = Arc::new(LockManager::new(cache.clone()));
        let index = Arc::new(MatchIndex::new(store.clone(), config.match_index_ttl()));
        let scheduler = Scheduler::new();
        let manager = Arc::new(ConnectionManager::new());
        let outbox = Arc::new(PushOutbox::new(PUSH_OUTBOX_CAPACITY));
        let (bus, fanout_worker) = EventBus::new(
            manager,
            outbox.clone(),
            config.inline_fanout_threshold,
        );
        let bus = Arc::new(bus);

        let hold_store = Arc::new(HoldStore::new(cache.clone(), config.hold_ttl()));
        let holds = Arc::new(HoldService::new(
            config.clone(),
            store.clone(),
            cache.clone(),
            hold_store,
            locks.clone(),
            bus.clone(),
            scheduler.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            config.clone(),
            store.clone(),
            cache.clone(),
            locks.clone(),
            index.clone(),
            bus.clone(),
            scheduler.clone(),
            holds.clone(),
        ));
        let routes = Arc::new(RouteProgressService::new(store.clone(), bus.clone()));

        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            store,
            cache,
            locks,
            index,
            bus,
            scheduler,
            orders,
            holds,
            routes,
            outbox,
            push_sender,
            memory_cache,
            fanout_worker: std::sync::Mutex::new(Some(fanout_worker)),
            shutdown_tx,
            started: AtomicBool::new(false),
        })
    }

    /// Spawn background jobs and rehydrate timers. Idempotent.
    pub async fn start(&self) -> DispatchResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(worker) = self.fanout_worker.lock().unwrap().take() {
            tokio::spawn(worker.run(self.shutdown_tx.subscribe()));
        }
        tokio::spawn(
            self.outbox
                .clone()
                .run_worker(self.push_sender.clone(), self.shutdown_tx.subscribe()),
        );

        let holds = self.holds.clone();
        self.scheduler.spawn_periodic(
            "job:hold-sweep",
            self.config.hold_cleanup_interval(),
            move || {
                let holds = holds.clone();
                async move {
                    if let Err(e) = holds.sweep_expired().await {
                        tracing::error!(error = %e, "hold sweep failed");
                    }
                }
            },
        );

        if let Some(cache) = &self.memory_cache {
            let cache = cache.clone();
            self.scheduler
                .spawn_periodic("job:cache-purge", CACHE_PURGE_INTERVAL, move || {
                    let cache = cache.clone();
                    async move {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "cache purge");
                        }
                    }
                });
        }

        let rehydrated = self.orders.rehydrate_expiry_timers().await?;
        tracing::info!(rehydrated, "dispatch engine started");
        Ok(())
    }

    /// Cancel all timers, stop workers and drain the push outbox.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.scheduler.shutdown();
        // The worker drains too, but it may already be gone; make sure.
        self.outbox.drain(self.push_sender.as_ref()).await;
        tracing::info!("dispatch engine stopped");
    }

    // Accessors for the gateway and tests.

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn match_index(&self) -> &Arc<MatchIndex> {
        &self.index
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    pub fn holds(&self) -> &Arc<HoldService> {
        &self.holds
    }

    pub fn routes(&self) -> &Arc<RouteProgressService> {
        &self.routes
    }

    pub fn outbox(&self) -> &Arc<PushOutbox> {
        &self.outbox
    }
}
