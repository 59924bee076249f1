//! # spark-filter-cache
//!
//! ## 定位与职责（Why）
//! - 为调用结果提供可配置的缓存：描述符参数 `cache` 选择实现，缺省为 `lru`；
//! - 缓存工厂以 `spark-rpc` 的 [`spark_rpc::ExtensionLoader`] 注册，宿主可追加自定义实现。
//!
//! ## 结构（How）
//! - [`Cache`] / [`CacheFactory`]：缓存与工厂契约，工厂按 (描述符, 方法) 记忆化缓存实例；
//! - [`LruCacheFactory`] / [`ExpiringCacheFactory`]：内置的容量淘汰与存活时间两种实现；
//! - [`CacheResolver`]：每次调用按方法级参数解析缓存；
//! - [`CacheFilter`]：在 Filter 链中短路命中的调用。

mod cache;
mod expiring;
mod filter;
mod lru;
mod resolver;

pub use cache::{Cache, CacheFactory, CacheTable};
pub use expiring::{CACHE_SECONDS_KEY, DEFAULT_CACHE_SECONDS, ExpiringCache, ExpiringCacheFactory};
pub use filter::CacheFilter;
pub use self::lru::{CACHE_SIZE_KEY, DEFAULT_CACHE_SIZE, LruCache, LruCacheFactory};
pub use resolver::CacheResolver;
