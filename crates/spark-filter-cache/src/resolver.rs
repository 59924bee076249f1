use std::sync::Arc;

use spark_rpc::{ExtensionLoader, Invocation, RpcError, ServiceDescriptor};

use crate::{Cache, CacheFactory, ExpiringCacheFactory, LruCacheFactory};

/// 按描述符参数为一次调用解析缓存。
///
/// # 教案式说明
/// - **意图 (Why)**：缓存实现由配置而非代码决定，同一服务的不同方法可以使用不同实现；
/// - **流程 (How)**：
///   1. 读取方法级 `cache` 选择器（`"{method}.cache"` 优先于 `cache`）；
///   2. 缺省、`true`、`default` 均指向 `lru`，其余取值按名称精确查找工厂；
///   3. 由工厂返回记忆化后的缓存实例；
/// - **契约 (What)**：每次调用都重新解析，未注册的名称返回 [`RpcError::ExtensionNotFound`]。
pub struct CacheResolver {
    factories: ExtensionLoader<dyn CacheFactory>,
}

impl CacheResolver {
    /// 以给定的工厂集合构造。
    pub fn new(factories: ExtensionLoader<dyn CacheFactory>) -> Self {
        Self { factories }
    }

    /// 注册内置的 `lru` 与 `expiring` 工厂。
    pub fn with_defaults() -> Self {
        Self::new(
            ExtensionLoader::<dyn CacheFactory>::new()
                .with(LruCacheFactory::NAME, Arc::new(LruCacheFactory::new()))
                .with(ExpiringCacheFactory::NAME, Arc::new(ExpiringCacheFactory::new())),
        )
    }

    pub fn factories(&self) -> &ExtensionLoader<dyn CacheFactory> {
        &self.factories
    }

    /// 某方法生效的缓存实现名称，与 [`Self::resolve_factory`] 查找的名称一致。
    pub fn selector<'a>(descriptor: &'a ServiceDescriptor, method: &str) -> &'a str {
        ExtensionLoader::<dyn CacheFactory>::adaptive_name_for_method(descriptor, method)
    }

    pub fn resolve_factory(
        &self,
        descriptor: &ServiceDescriptor,
        method: &str,
    ) -> Result<Arc<dyn CacheFactory>, RpcError> {
        self.factories.resolve_adaptive_for_method(descriptor, method)
    }

    pub fn get_cache(
        &self,
        descriptor: &ServiceDescriptor,
        invocation: &Invocation,
    ) -> Result<Arc<dyn Cache>, RpcError> {
        let method = invocation.method_name();
        let factory = self.resolve_factory(descriptor, method)?;
        let cache = factory.get_cache(descriptor, invocation);
        tracing::trace!(
            service = %descriptor.identity(),
            method,
            selector = Self::selector(descriptor, method),
            cache = cache.kind(),
            "cache resolved"
        );
        Ok(cache)
    }
}

impl Default for CacheResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}
