use std::{num::NonZeroUsize, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value;
use spark_rpc::{Invocation, ServiceDescriptor};

use crate::{Cache, CacheFactory, CacheTable};

/// 容量参数键。
pub const CACHE_SIZE_KEY: &str = "cache.size";

/// 容量缺省值。
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// 有界的最近最少使用缓存。
///
/// - **结构 (How)**：`lru::LruCache` 外包一把互斥锁；`get` 需要刷新访问顺序，因此读也取写锁；
/// - **契约 (What)**：容量至少为 1（配置为 0 时按 1 处理）；`get` 命中会刷新该键的访问顺序。
#[derive(Debug)]
pub struct LruCache {
    inner: Mutex<::lru::LruCache<String, Value>>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(::lru::LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for LruCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    fn put(&self, key: String, value: Value) {
        self.inner.lock().put(key, value);
    }

    fn kind(&self) -> &'static str {
        LruCacheFactory::NAME
    }
}

/// `lru` 缓存工厂：每个 (描述符, 方法) 一个 [`LruCache`]，容量读取方法级 `cache.size`。
#[derive(Default)]
pub struct LruCacheFactory {
    caches: CacheTable<LruCache>,
}

impl LruCacheFactory {
    pub const NAME: &'static str = "lru";

    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheFactory for LruCacheFactory {
    fn get_cache(&self, descriptor: &ServiceDescriptor, invocation: &Invocation) -> Arc<dyn Cache> {
        let method = invocation.method_name();
        self.caches.get_or_create(descriptor, method, || {
            LruCache::new(descriptor.method_parameter_as(method, CACHE_SIZE_KEY, DEFAULT_CACHE_SIZE))
        })
    }
}
