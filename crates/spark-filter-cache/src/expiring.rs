use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::Value;
use spark_rpc::{Invocation, ServiceDescriptor};

use crate::{Cache, CacheFactory, CacheTable};

/// 存活时间参数键（秒）。
pub const CACHE_SECONDS_KEY: &str = "cache.seconds";

/// 存活时间缺省值（秒）。
pub const DEFAULT_CACHE_SECONDS: u64 = 180;

/// 按写入时间过期的缓存。
///
/// - **契约 (What)**：条目写入满 `ttl` 后不再命中；读取时惰性删除过期条目，
///   写入时若距上次清扫已超过 `ttl` 则整体清扫一次，避免从不被读取的键长期驻留。
#[derive(Debug)]
pub struct ExpiringCache {
    ttl: Duration,
    inner: Mutex<ExpiringState>,
}

#[derive(Debug)]
struct ExpiringState {
    entries: HashMap<String, (Value, Instant)>,
    last_sweep: Instant,
}

impl ExpiringCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(ExpiringState {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for ExpiringCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.lock();
        let (value, written) = state.entries.get(key)?;
        if written.elapsed() < self.ttl {
            return Some(value.clone());
        }
        state.entries.remove(key);
        None
    }

    fn put(&self, key: String, value: Value) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        if now.duration_since(state.last_sweep) >= self.ttl {
            let ttl = self.ttl;
            state
                .entries
                .retain(|_, (_, written)| now.duration_since(*written) < ttl);
            state.last_sweep = now;
        }
        state.entries.insert(key, (value, now));
    }

    fn kind(&self) -> &'static str {
        ExpiringCacheFactory::NAME
    }
}

/// `expiring` 缓存工厂：存活时间读取方法级 `cache.seconds`。
#[derive(Default)]
pub struct ExpiringCacheFactory {
    caches: CacheTable<ExpiringCache>,
}

impl ExpiringCacheFactory {
    pub const NAME: &'static str = "expiring";

    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheFactory for ExpiringCacheFactory {
    fn get_cache(&self, descriptor: &ServiceDescriptor, invocation: &Invocation) -> Arc<dyn Cache> {
        let method = invocation.method_name();
        self.caches.get_or_create(descriptor, method, || {
            let seconds =
                descriptor.method_parameter_as(method, CACHE_SECONDS_KEY, DEFAULT_CACHE_SECONDS);
            ExpiringCache::new(Duration::from_secs(seconds))
        })
    }
}
