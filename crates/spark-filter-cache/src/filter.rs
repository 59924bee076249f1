use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use spark_rpc::{
    Activation, Filter, Invocation, InvocationResult, Invoker, RpcError, Side, keys::CACHE_KEY,
};

use crate::CacheResolver;

/// 结果缓存 Filter。
///
/// # 教案式说明
/// - **意图 (Why)**：对幂等、读多的方法按参数缓存返回值，命中时完全跳过下一阶段；
/// - **流程 (How)**：
///   1. 方法未配置 `cache`（或配置为 `false`）时直接透传；
///   2. 经 [`CacheResolver`] 解析缓存，键为参数列表的 JSON 文本；
///   3. 命中则返回缓存值；未命中则调用下一阶段，只缓存返回值结果；
/// - **契约 (What)**：业务异常结果与错误都不会写入缓存；缓存解析失败以错误返回，不会调用下一阶段。
#[derive(Clone)]
pub struct CacheFilter {
    resolver: Arc<CacheResolver>,
}

impl CacheFilter {
    /// 注册名称。
    pub const NAME: &'static str = "cache";

    pub fn new(resolver: Arc<CacheResolver>) -> Self {
        Self { resolver }
    }

    /// 两侧均可装配，以 `cache` 参数激活。
    pub fn activation() -> Activation {
        Activation::new()
            .on(Side::Consumer)
            .on(Side::Provider)
            .when_key(CACHE_KEY)
    }

    /// 参数列表对应的缓存键。
    pub fn cache_key(invocation: &Invocation) -> String {
        Value::Array(invocation.arguments().to_vec()).to_string()
    }
}

#[async_trait]
impl Filter for CacheFilter {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: Invocation,
    ) -> Result<InvocationResult, RpcError> {
        let descriptor = next.descriptor();
        let enabled = descriptor
            .method_parameter(invocation.method_name(), CACHE_KEY)
            .is_some_and(|selector| selector != "false");
        if !enabled {
            return next.invoke(invocation).await;
        }

        let cache = self.resolver.get_cache(descriptor, &invocation)?;
        let key = Self::cache_key(&invocation);
        if let Some(value) = cache.get(&key) {
            tracing::trace!(
                service = %descriptor.identity(),
                method = invocation.method_name(),
                key = %key,
                "cache hit"
            );
            return Ok(InvocationResult::Value(value));
        }

        let result = next.invoke(invocation).await?;
        if let Some(value) = result.as_value() {
            cache.put(key, value.clone());
        }
        Ok(result)
    }
}
