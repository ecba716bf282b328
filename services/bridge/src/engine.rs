//! Wires C1-C7 together behind per-component locks (§5): the Cache, the
//! downlink adapter, the WebConfig Engine, the Notification Pipeline, and
//! the Performance Registry. No lock is held across an external call —
//! the adapter/backup I/O always happens with only the lock it needs held.

use crate::cache::Cache;
use crate::config::BridgeConfig;
use crate::downlink::mock::MockDownlink;
use crate::downlink::DownlinkAdapter;
use crate::notify::NotificationPipeline;
use crate::performance::{names, PerformanceRegistry};
use crate::webconfig::{ParamUpdate, TransactionMode, TransactionResult, WebConfigEngine};
use bridge_protocol::{Request, Response};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Engine {
    cache: Mutex<Cache>,
    downlink: Mutex<Box<dyn DownlinkAdapter>>,
    webconfig: Mutex<WebConfigEngine>,
    pub notifications: NotificationPipeline,
    pub performance: PerformanceRegistry,
}

impl Engine {
    /// Build the engine from a validated config. The downlink adapter is
    /// always the in-memory mock: the real rbus client is out of scope for
    /// this repository (§1), so both `--mode mock` and `--mode parodus`
    /// (which only selects the *uplink* transport) run against it.
    #[must_use]
    pub fn new(cfg: &BridgeConfig) -> Self {
        let mut downlink = MockDownlink::new();
        let _ = downlink.open(&cfg.downlink.component);

        let cache = Cache::new(
            cfg.cache.max_entries,
            std::time::Duration::from_secs(cfg.cache.default_ttl_secs),
        );
        let webconfig = WebConfigEngine::new(
            cfg.webconfig.backup_dir.clone(),
            cfg.webconfig.max_transaction_size,
            cfg.webconfig.rollback_enabled,
        );
        let notifications = NotificationPipeline::new(cfg.notifications.clone(), cfg.uplink.service_name.clone());

        Engine {
            cache: Mutex::new(cache),
            downlink: Mutex::new(Box::new(downlink)),
            webconfig: Mutex::new(webconfig),
            notifications,
            performance: PerformanceRegistry::new(),
        }
    }

    /// Run one internal request through the Protocol Engine (C3), then emit
    /// whatever notifications it produced.
    pub fn dispatch(&self, req: &Request) -> Response {
        let timer_name = dispatch_timer_name(req);
        let (response, produced) = self.performance.time(timer_name, || {
            let mut cache = self.cache.lock().unwrap();
            let mut downlink = self.downlink.lock().unwrap();
            crate::protocol_engine::dispatch(req, downlink.as_mut(), &mut cache)
        });
        self.notifications.emit_all(produced, now_ms());
        response
    }

    /// Run a WebConfig transaction (C4) against the shared cache and
    /// downlink adapter, then emit whatever notifications it produced.
    pub fn execute_transaction(
        &self,
        transaction_id: &str,
        updates: &[ParamUpdate],
        mode: TransactionMode,
    ) -> TransactionResult {
        let (result, produced) = self.performance.time(names::TRANSACTION, || {
            let mut cache = self.cache.lock().unwrap();
            let mut downlink = self.downlink.lock().unwrap();
            let mut webconfig = self.webconfig.lock().unwrap();
            webconfig.execute(transaction_id, updates, mode, downlink.as_mut(), &mut cache)
        });
        self.notifications.emit_all(produced, now_ms());
        result
    }

    #[must_use]
    pub fn cache_stats(&self) -> crate::cache::CacheStatsReport {
        self.cache.lock().unwrap().stats()
    }

    #[must_use]
    pub fn webconfig_stats(&self) -> crate::webconfig::WebConfigStats {
        self.webconfig.lock().unwrap().stats()
    }

    #[must_use]
    pub fn performance_report(&self) -> crate::performance::PerformanceReport {
        self.performance.snapshot()
    }

    /// Persist the cache to disk if `cache.enable_persistence` is set, using
    /// the path from config. Called on a clean shutdown (§5).
    pub fn snapshot_cache(&self, path: &std::path::Path) -> Result<(), crate::cache::CacheError> {
        self.cache.lock().unwrap().snapshot_to_file(path)
    }

    /// Release the downlink connection. Called last during shutdown, after
    /// every other component has been released (§5's reverse-init-order
    /// close discipline).
    pub fn close(&self) {
        let _ = self.downlink.lock().unwrap().close();
    }
}

fn dispatch_timer_name(req: &Request) -> &'static str {
    match req.op {
        Some(bridge_protocol::Op::Get) => names::DISPATCH_GET,
        Some(bridge_protocol::Op::Set) | Some(bridge_protocol::Op::TestAndSet) => names::DISPATCH_SET,
        _ => names::DISPATCH_GET,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
