//! 缓存 Filter 与准入 Filter 在同一服务端链路中的协作。
//!
//! - **Why**：缓存命中会短路其后的全部阶段，链路顺序决定命中的调用是否仍计入准入统计；
//! - **What**：以 `order` 把缓存放在准入之前，命中的调用不占用许可也不产生统计；
//!   并发首次解析同一缓存只得到一个实例。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use proptest::prelude::*;
use serde_json::{Value, json};
use spark_filter_cache::{CacheFactory, CacheFilter, CacheResolver, LruCacheFactory};
use spark_rpc::{
    ExecuteLimitFilter, FilterChain, FilterRegistry, Invocation, InvocationResult, Invoker,
    InvokerState, RpcError, RpcStatusRegistry, ServiceDescriptor, Side, async_trait,
};

struct Lookup {
    state: InvokerState,
    calls: AtomicUsize,
}

#[async_trait]
impl Invoker for Lookup {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.state.descriptor()
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = invocation.arguments().first().cloned().unwrap_or(Value::Null);
        Ok(InvocationResult::value(json!({ "id": id })))
    }

    fn destroy(&self) {
        self.state.destroy();
    }
}

fn chain(statuses: &Arc<RpcStatusRegistry>, terminal: Arc<Lookup>) -> FilterChain {
    FilterRegistry::new()
        .with(
            ExecuteLimitFilter::NAME,
            Arc::new(ExecuteLimitFilter::new(Arc::clone(statuses))),
            ExecuteLimitFilter::activation().order(10),
        )
        .with(
            CacheFilter::NAME,
            Arc::new(CacheFilter::new(Arc::new(CacheResolver::with_defaults()))),
            CacheFilter::activation().order(-10),
        )
        .build_chain(terminal, Side::Provider)
        .expect("链路组装不应失败")
}

#[tokio::test]
async fn cache_hits_bypass_admission_accounting() {
    let statuses = Arc::new(RpcStatusRegistry::new());
    let descriptor = ServiceDescriptor::builder("injvm", "com.acme.Users")
        .parameter("find.cache", "lru")
        .parameter("find.executes", "1")
        .build();
    let terminal = Arc::new(Lookup {
        state: InvokerState::new(descriptor),
        calls: AtomicUsize::new(0),
    });
    let chain = chain(&statuses, Arc::clone(&terminal));
    assert_eq!(chain.filter_names(), vec!["cache", "executes"]);

    for _ in 0..3 {
        let result = chain
            .invoke(Invocation::new("find").with_arguments(vec![json!(7)]))
            .await
            .expect("调用应成功");
        assert_eq!(result.as_value(), Some(&json!({ "id": 7 })));
    }

    assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    let status = statuses.get_status(chain.descriptor().identity(), "find");
    assert_eq!(status.total(), 1, "命中缓存的调用不经过准入");
}

#[test]
fn concurrent_first_resolution_yields_one_cache() {
    let factory = Arc::new(LruCacheFactory::new());
    let descriptor = ServiceDescriptor::builder("injvm", "com.acme.Users")
        .parameter("cache", "lru")
        .build();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let factory = Arc::clone(&factory);
            let descriptor = descriptor.clone();
            std::thread::spawn(move || {
                let cache = factory.get_cache(&descriptor, &Invocation::new("find"));
                cache.put(format!("[{i}]"), json!(i));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("线程不应 panic");
    }

    let cache = factory.get_cache(&descriptor, &Invocation::new("find"));
    for i in 0..8 {
        assert_eq!(cache.get(&format!("[{i}]")), Some(json!(i)), "所有写入落在同一实例");
    }
}

proptest! {
    /// 性质：任意写入序列之后，LRU 缓存的条目数不超过容量，且最后写入的键总能命中。
    #[test]
    fn prop_lru_respects_capacity(
        capacity in 1usize..8,
        keys in proptest::collection::vec(0u8..16, 1..64),
    ) {
        let factory = LruCacheFactory::new();
        let descriptor = ServiceDescriptor::builder("injvm", "S")
            .parameter("cache.size", capacity.to_string())
            .build();
        let cache = factory.get_cache(&descriptor, &Invocation::new("find"));

        for key in &keys {
            cache.put(key.to_string(), json!(key));
        }

        let resident = (0u8..16).filter(|key| cache.get(&key.to_string()).is_some()).count();
        prop_assert!(resident <= capacity);
        let last = keys[keys.len() - 1];
        prop_assert_eq!(cache.get(&last.to_string()), Some(json!(last)));
    }
}
