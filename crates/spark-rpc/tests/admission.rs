//! 准入控制端到端场景：Filter 链 + RpcStatus 仓储 + 受控终端 Invoker。
//!
//! # 教案级导览
//!
//! - **Why**：准入过滤器的正确性取决于“许可、统计、下一阶段”三者在并发下的配合，单元测试只能覆盖
//!   其中一段，这里以真实的 [`FilterRegistry::build_chain`] 组装服务端链路验证整体行为。
//! - **How**：终端 Invoker 通过 `entered` 通道报告“已进入”，并阻塞在一个初始为 0 的信号量上，
//!   测试可以精确地让若干调用同时停留在执行中；高并发场景则以原子计数器记录观测到的最大并发。
//! - **What**：覆盖上限拒绝、上限从不被突破、不限流方法、取消时的统计收敛以及统计恒等式。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use proptest::prelude::*;
use serde_json::json;
use spark_rpc::{
    ExecuteLimitFilter, FilterChain, FilterRegistry, Invocation, InvocationResult, Invoker,
    InvokerState, RpcError, RpcStatusRegistry, ServiceDescriptor, ServiceIdentity, Side,
    async_trait,
};
use tokio::sync::{Semaphore, mpsc};

/// 受控终端：进入时发信号，然后等待测试放行。
struct Gated {
    state: InvokerState,
    entered: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
}

#[async_trait]
impl Invoker for Gated {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.state.descriptor()
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
        let _ = self.entered.send(());
        let permit = self
            .release
            .acquire()
            .await
            .map_err(RpcError::foreign)?;
        permit.forget();
        Ok(InvocationResult::value(json!(invocation.method_name())))
    }

    fn destroy(&self) {
        self.state.destroy();
    }
}

/// 记录同时执行数峰值的终端；`fail` 附件为真时返回外来失败。
struct Counting {
    state: InvokerState,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Invoker for Counting {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.state.descriptor()
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if invocation.attachment("sleep").is_some() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if invocation.attachment("fail") == Some("true") {
            return Err(RpcError::foreign(std::io::Error::other("boom")));
        }
        Ok(InvocationResult::value(json!("ok")))
    }

    fn destroy(&self) {
        self.state.destroy();
    }
}

fn descriptor(parameters: &[(&str, &str)]) -> ServiceDescriptor {
    parameters
        .iter()
        .fold(
            ServiceDescriptor::builder("injvm", "com.acme.Orders").version("1.0"),
            |builder, (key, value)| builder.parameter(*key, *value),
        )
        .build()
}

fn provider_chain(statuses: &Arc<RpcStatusRegistry>, terminal: Arc<dyn Invoker>) -> FilterChain {
    FilterRegistry::new()
        .with(
            ExecuteLimitFilter::NAME,
            Arc::new(ExecuteLimitFilter::new(Arc::clone(statuses))),
            ExecuteLimitFilter::activation(),
        )
        .build_chain(terminal, Side::Provider)
        .expect("服务端链路组装不应失败")
}

fn gated(
    descriptor: ServiceDescriptor,
) -> (Arc<Gated>, mpsc::UnboundedReceiver<()>, Arc<Semaphore>) {
    let (entered, entered_rx) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let invoker = Arc::new(Gated {
        state: InvokerState::new(descriptor),
        entered,
        release: Arc::clone(&release),
    });
    (invoker, entered_rx, release)
}

fn counting(descriptor: ServiceDescriptor) -> Arc<Counting> {
    Arc::new(Counting {
        state: InvokerState::new(descriptor),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    })
}

/// ## 场景一：上限为 2 时第三个并发调用被拒绝
///
/// - **逻辑 (How)**：两个调用停留在终端内，第三个调用必须立即返回
///   [`RpcError::ConcurrencyLimitExceeded`]，且不改变任何统计；放行后两个调用成功结束。
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn third_concurrent_call_is_rejected_while_two_are_in_flight() {
    let statuses = Arc::new(RpcStatusRegistry::new());
    let (terminal, mut entered, release) = gated(descriptor(&[("foo.executes", "2")]));
    let chain = Arc::new(provider_chain(&statuses, terminal));
    assert_eq!(chain.filter_names(), vec!["executes"]);

    let spawn_call = |chain: Arc<FilterChain>| {
        tokio::spawn(async move { chain.invoke(Invocation::new("foo")).await })
    };
    let first = spawn_call(Arc::clone(&chain));
    let second = spawn_call(Arc::clone(&chain));
    entered.recv().await.expect("第一个调用应进入终端");
    entered.recv().await.expect("第二个调用应进入终端");

    let identity = chain.descriptor().identity().clone();
    let status = statuses.get_status(&identity, "foo");
    assert_eq!(status.active(), 2);

    let rejected = chain.invoke(Invocation::new("foo")).await;
    match rejected {
        Err(RpcError::ConcurrencyLimitExceeded {
            service,
            method,
            max,
        }) => {
            assert_eq!(service, "com.acme.Orders:1.0");
            assert_eq!(method, "foo");
            assert_eq!(max, 2);
        }
        other => panic!("第三个调用必须被拒绝，实际为 {other:?}"),
    }
    assert_eq!((status.active(), status.total()), (2, 0), "拒绝不应改动统计");

    release.add_permits(2);
    for handle in [first, second] {
        let result = handle
            .await
            .expect("任务不应 panic")
            .expect("已准入的调用应成功");
        assert_eq!(result.as_value(), Some(&json!("foo")));
    }

    assert_eq!(status.active(), 0);
    assert_eq!(status.total(), 2);
    assert_eq!(status.succeeded(), 2);
    assert_eq!(status.failed(), 0);
    assert_eq!(status.semaphore(2).available_permits(), 2);

    release.add_permits(1);
    chain
        .invoke(Invocation::new("foo"))
        .await
        .expect("许可归还后新的调用应被准入");
}

/// ## 场景二：高并发下执行数从不超过上限
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_executions_never_exceed_the_limit() {
    const LIMIT: usize = 4;
    const CALLS: usize = 64;

    let statuses = Arc::new(RpcStatusRegistry::new());
    let terminal = counting(descriptor(&[("executes", "4")]));
    let chain = Arc::new(provider_chain(&statuses, terminal.clone()));

    let handles: Vec<_> = (0..CALLS)
        .map(|_| {
            let chain = Arc::clone(&chain);
            tokio::spawn(async move {
                chain
                    .invoke(Invocation::new("foo").with_attachment("sleep", "1"))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("任务不应 panic") {
            Ok(_) => admitted += 1,
            Err(RpcError::ConcurrencyLimitExceeded { .. }) => rejected += 1,
            Err(other) => panic!("出现意外错误：{other}"),
        }
    }

    assert_eq!(admitted + rejected, CALLS);
    assert!(admitted >= 1, "至少有一个调用应被准入");
    assert!(terminal.peak.load(Ordering::SeqCst) <= LIMIT);

    let status = statuses.get_status(chain.descriptor().identity(), "foo");
    assert_eq!(status.total(), admitted as u64);
    assert_eq!(status.active(), 0);
    assert_eq!(status.semaphore(4).available_permits(), LIMIT);
}

/// ## 场景三：未配置上限的方法不受约束，也不创建信号量
#[tokio::test]
async fn unlimited_method_admits_every_call() {
    let statuses = Arc::new(RpcStatusRegistry::new());
    let terminal = counting(descriptor(&[("foo.executes", "2")]));
    let chain = provider_chain(&statuses, terminal);

    let results = join_all((0..1000).map(|_| chain.invoke(Invocation::new("bar")))).await;
    assert!(results.iter().all(Result::is_ok));

    let identity = chain.descriptor().identity().clone();
    let bar = statuses.get_status(&identity, "bar");
    assert_eq!(bar.total(), 1000);
    assert_eq!(bar.succeeded(), 1000);
    assert_eq!(bar.permits(), None);

    let service = statuses.get_status(&identity, "*");
    assert_eq!(service.total(), 1000, "服务级统计汇总全部方法");
}

/// ## 场景四：执行中的调用被取消时统计收敛并归还许可
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_call_is_counted_as_failed_and_returns_its_permit() {
    let statuses = Arc::new(RpcStatusRegistry::new());
    let (terminal, mut entered, _release) = gated(descriptor(&[("executes", "1")]));
    let chain = Arc::new(provider_chain(&statuses, terminal));

    let handle = tokio::spawn({
        let chain = Arc::clone(&chain);
        async move { chain.invoke(Invocation::new("foo")).await }
    });
    entered.recv().await.expect("调用应进入终端");

    let status = statuses.get_status(chain.descriptor().identity(), "foo");
    assert_eq!(status.active(), 1);

    handle.abort();
    let joined = handle.await;
    assert!(joined.is_err_and(|err| err.is_cancelled()));

    assert_eq!(status.active(), 0);
    assert_eq!(status.total(), 1);
    assert_eq!(status.failed(), 1);
    assert_eq!(status.semaphore(1).available_permits(), 1);
}

/// ## 场景五：外来失败被包装，统计按失败登记
#[tokio::test]
async fn foreign_failures_surface_as_unexpected_invocation_failures() {
    let statuses = Arc::new(RpcStatusRegistry::new());
    let terminal = counting(descriptor(&[("executes", "3")]));
    let chain = provider_chain(&statuses, terminal);

    let err = chain
        .invoke(Invocation::new("foo").with_attachment("fail", "true"))
        .await
        .expect_err("外来失败必须返回错误");
    assert!(matches!(err, RpcError::UnexpectedInvocationFailure { .. }));

    let identity = ServiceIdentity::new("com.acme.Orders", None, Some("1.0"));
    let status = statuses.get_status(&identity, "foo");
    assert_eq!((status.total(), status.failed()), (1, 1));
}

proptest! {
    /// 性质：任意成功/失败序列结束后，`total == succeeded + failed` 且 `active == 0`。
    #[test]
    fn prop_counters_balance_after_any_outcome_sequence(
        outcomes in proptest::collection::vec(any::<bool>(), 0..64),
    ) {
        let statuses = Arc::new(RpcStatusRegistry::new());
        let terminal = counting(descriptor(&[("executes", "8")]));
        let chain = provider_chain(&statuses, terminal);

        futures::executor::block_on(async {
            for succeed in &outcomes {
                let invocation = Invocation::new("foo")
                    .with_attachment("fail", if *succeed { "false" } else { "true" });
                let _ = chain.invoke(invocation).await;
            }
        });

        let status = statuses.get_status(chain.descriptor().identity(), "foo");
        let failures = outcomes.iter().filter(|succeed| !**succeed).count() as u64;
        prop_assert_eq!(status.total(), outcomes.len() as u64);
        prop_assert_eq!(status.total(), status.succeeded() + status.failed());
        prop_assert_eq!(status.failed(), failures);
        prop_assert_eq!(status.active(), 0);
    }
}
