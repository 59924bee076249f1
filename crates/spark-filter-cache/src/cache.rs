//! 缓存与缓存工厂契约。

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use spark_rpc::{
    ExtensionPoint, Invocation, ServiceDescriptor,
    keys::{CACHE_KEY, DEFAULT_CACHE},
};

/// 以调用参数为键的结果缓存。
///
/// - **契约 (What)**：`get`/`put` 可被并发调用；实现自行决定淘汰策略，`get` 未命中返回 `None`。
pub trait Cache: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Value>;

    fn put(&self, key: String, value: Value);

    /// 实现名称，与注册到扩展加载器的名称一致。
    fn kind(&self) -> &'static str;
}

/// 为 (描述符, 调用) 产出缓存实例的工厂。
///
/// # 教案式说明
/// - **意图 (Why)**：缓存策略由描述符参数 `cache` 选择，工厂是可插拔的扩展点；
/// - **契约 (What)**：同一描述符与方法多次获取应得到同一个缓存实例，使结果能跨调用复用；
/// - **扩展 (How)**：实现者通常借助 [`CacheTable`] 完成按 (描述符, 方法) 的记忆化。
pub trait CacheFactory: Send + Sync + 'static {
    fn get_cache(&self, descriptor: &ServiceDescriptor, invocation: &Invocation) -> Arc<dyn Cache>;
}

impl ExtensionPoint for dyn CacheFactory {
    const KIND: &'static str = "cache_factory";
    const DEFAULT_NAME: Option<&'static str> = Some(DEFAULT_CACHE);
    const ADAPTIVE_KEY: Option<&'static str> = Some(CACHE_KEY);
}

/// 按 (描述符, 方法) 记忆化的缓存表。
///
/// 键直接使用描述符值：相等比较覆盖端点、身份与全部参数，参数不同的两个描述符不会共享缓存。
pub struct CacheTable<C> {
    caches: DashMap<(ServiceDescriptor, String), Arc<C>>,
}

impl<C> CacheTable<C>
where
    C: Cache,
{
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
        }
    }

    /// 取得既有缓存，不存在时以 `create` 构造；并发首次访问只会保留一个实例。
    pub fn get_or_create<F>(&self, descriptor: &ServiceDescriptor, method: &str, create: F) -> Arc<C>
    where
        F: FnOnce() -> C,
    {
        let key = (descriptor.clone(), method.to_owned());
        if let Some(cache) = self.caches.get(&key) {
            return Arc::clone(cache.value());
        }
        let entry = self
            .caches
            .entry(key)
            .or_insert_with(|| Arc::new(create()));
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl<C> Default for CacheTable<C>
where
    C: Cache,
{
    fn default() -> Self {
        Self::new()
    }
}
