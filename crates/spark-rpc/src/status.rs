//! # RpcStatus：按“服务身份 + 方法”维度的实时调用统计
//!
//! ## 核心意图（Why）
//! - 为准入控制提供每方法一个的有界信号量，为监控协作方提供活跃数、总数、失败数与耗时；
//! - 以显式的 [`RpcStatusRegistry`] 对象承载进程级统计，由宿主创建后通过 `Arc` 注入各组件，
//!   而不是隐式的全局可变状态。
//!
//! ## 行为契约（What）
//! - [`RpcStatusRegistry::get_status`]：基于 `DashMap` entry API 的 get-or-create，同一键在并发首次访问下
//!   只会创建一个实例；
//! - [`RpcStatusRegistry::begin_call`]：登记调用开始并返回 [`CallGuard`]，守卫在 `Drop` 中恰好一次地完成
//!   结束登记与许可释放；未调用 [`CallGuard::finish`] 就被丢弃的守卫按失败计入；
//! - 每次开始/结束同时更新方法级统计与服务级（方法通配符 `*`）统计。
//!
//! ## 风险提示（Trade-offs）
//! - 计数器之间仅保证最终一致：并发读取时 `total` 与 `failed` 可能来自不同时刻；
//! - 信号量在首次访问时按当时的上限创建，之后不会随配置变化，需要调整上限时请 [`RpcStatusRegistry::reset`]。

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{ServiceIdentity, keys::ANY_METHOD};

/// 单个统计维度的实时计数。
#[derive(Debug, Default)]
pub struct RpcStatus {
    active: AtomicU64,
    total: AtomicU64,
    failed: AtomicU64,
    total_elapsed_nanos: AtomicU64,
    failed_elapsed_nanos: AtomicU64,
    max_elapsed_nanos: AtomicU64,
    failed_max_elapsed_nanos: AtomicU64,
    succeeded_max_elapsed_nanos: AtomicU64,
    admission: OnceLock<Admission>,
}

#[derive(Debug)]
struct Admission {
    permits: u32,
    semaphore: Arc<Semaphore>,
}

impl RpcStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前正在执行的调用数。
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> u64 {
        self.total().saturating_sub(self.failed())
    }

    pub fn total_elapsed(&self) -> Duration {
        nanos(&self.total_elapsed_nanos)
    }

    pub fn failed_elapsed(&self) -> Duration {
        nanos(&self.failed_elapsed_nanos)
    }

    pub fn succeeded_elapsed(&self) -> Duration {
        self.total_elapsed().saturating_sub(self.failed_elapsed())
    }

    pub fn max_elapsed(&self) -> Duration {
        nanos(&self.max_elapsed_nanos)
    }

    pub fn failed_max_elapsed(&self) -> Duration {
        nanos(&self.failed_max_elapsed_nanos)
    }

    pub fn succeeded_max_elapsed(&self) -> Duration {
        nanos(&self.succeeded_max_elapsed_nanos)
    }

    pub fn average_elapsed(&self) -> Duration {
        average(self.total_elapsed(), self.total())
    }

    pub fn failed_average_elapsed(&self) -> Duration {
        average(self.failed_elapsed(), self.failed())
    }

    pub fn succeeded_average_elapsed(&self) -> Duration {
        average(self.succeeded_elapsed(), self.succeeded())
    }

    /// 返回准入信号量；首次调用按 `permits` 创建，之后复用同一实例。
    pub fn semaphore(&self, permits: u32) -> Arc<Semaphore> {
        Arc::clone(&self.admission(permits).semaphore)
    }

    /// 信号量创建时使用的许可数；尚未创建时为 `None`。
    pub fn permits(&self) -> Option<u32> {
        self.admission.get().map(|admission| admission.permits)
    }

    /// 非阻塞地申请一个许可，许可耗尽时返回 `None`。
    pub fn try_acquire(&self, permits: u32) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.admission(permits).semaphore)
            .try_acquire_owned()
            .ok()
    }

    fn admission(&self, permits: u32) -> &Admission {
        self.admission.get_or_init(|| Admission {
            permits,
            semaphore: Arc::new(Semaphore::new(permits as usize)),
        })
    }

    fn begin(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self, elapsed: Duration, succeeded: bool) {
        let elapsed = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);

        // 仅由 begin 配对调用，active 不会下溢。
        self.active.fetch_sub(1, Ordering::AcqRel);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::AcqRel);
            self.failed_elapsed_nanos
                .fetch_add(elapsed, Ordering::AcqRel);
            self.failed_max_elapsed_nanos
                .fetch_max(elapsed, Ordering::AcqRel);
        } else {
            self.succeeded_max_elapsed_nanos
                .fetch_max(elapsed, Ordering::AcqRel);
        }
        self.total_elapsed_nanos.fetch_add(elapsed, Ordering::AcqRel);
        self.max_elapsed_nanos.fetch_max(elapsed, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
    }
}

fn nanos(counter: &AtomicU64) -> Duration {
    Duration::from_nanos(counter.load(Ordering::Acquire))
}

fn average(elapsed: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => elapsed / count,
        Err(_) => Duration::from_nanos(
            u64::try_from(elapsed.as_nanos() / u128::from(count)).unwrap_or(u64::MAX),
        ),
    }
}

/// 方法级统计的注册表键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusKey {
    identity: ServiceIdentity,
    method: Arc<str>,
}

impl StatusKey {
    pub fn new(identity: ServiceIdentity, method: &str) -> Self {
        Self {
            identity,
            method: Arc::from(method),
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// 统计快照，供监控协作方导出。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub identity: ServiceIdentity,
    /// `None` 表示服务级（跨方法）统计。
    pub method: Option<String>,
    pub active: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_elapsed: Duration,
    pub max_elapsed: Duration,
}

impl StatusSnapshot {
    fn capture(identity: &ServiceIdentity, method: Option<&str>, status: &RpcStatus) -> Self {
        let total = status.total();
        let failed = status.failed();
        Self {
            identity: identity.clone(),
            method: method.map(str::to_owned),
            active: status.active(),
            total,
            succeeded: total.saturating_sub(failed),
            failed,
            total_elapsed: status.total_elapsed(),
            max_elapsed: status.max_elapsed(),
        }
    }
}

/// 进程级 RpcStatus 仓储。
///
/// # 教案式注释
/// - **意图 (Why)**：封装并发安全存储，避免上层直接操作 `DashMap`；生命周期与宿主一致，
///   正常运行期间不会销毁条目；
/// - **契约 (What)**：以 [`ServiceIdentity`]（不含主机与端口）加方法名为键；方法名 `*` 指向服务级统计；
/// - **风险 (Trade-offs)**：`DashMap` guard 持有期间会阻塞同分片写操作，本类型只在 get-or-create
///   的瞬间持有 guard，并立即克隆出 `Arc` 返回。
#[derive(Debug, Default)]
pub struct RpcStatusRegistry {
    services: DashMap<ServiceIdentity, Arc<RpcStatus>>,
    methods: DashMap<StatusKey, Arc<RpcStatus>>,
}

impl RpcStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务级统计（跨全部方法）。
    pub fn get_service_status(&self, identity: &ServiceIdentity) -> Arc<RpcStatus> {
        if let Some(status) = self.services.get(identity) {
            return Arc::clone(status.value());
        }
        let entry = self.services.entry(identity.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// 方法级统计的 get-or-create；`method` 为 `*` 时返回服务级统计。
    pub fn get_status(&self, identity: &ServiceIdentity, method: &str) -> Arc<RpcStatus> {
        if method == ANY_METHOD {
            return self.get_service_status(identity);
        }
        let entry = self
            .methods
            .entry(StatusKey::new(identity.clone(), method))
            .or_default();
        Arc::clone(entry.value())
    }

    /// 登记一次调用开始，同时更新方法级与服务级统计。
    ///
    /// - **输入**：`permit` 为准入阶段获得的许可，守卫结束时随之释放；
    /// - **后置条件**：返回的守卫被丢弃时恰好执行一次结束登记。
    pub fn begin_call(
        &self,
        identity: &ServiceIdentity,
        method: &str,
        permit: Option<OwnedSemaphorePermit>,
    ) -> CallGuard {
        let method = self.get_status(identity, method);
        let service = self.get_service_status(identity);
        CallGuard::start(service, method, permit)
    }

    /// 管理操作：移除某个方法的统计（含其信号量）。
    pub fn reset(&self, identity: &ServiceIdentity, method: &str) -> Option<Arc<RpcStatus>> {
        if method == ANY_METHOD {
            return self.services.remove(identity).map(|(_, status)| status);
        }
        self.methods
            .remove(&StatusKey::new(identity.clone(), method))
            .map(|(_, status)| status)
    }

    /// 管理操作：移除某个服务的全部统计。
    pub fn reset_service(&self, identity: &ServiceIdentity) {
        self.services.remove(identity);
        self.methods.retain(|key, _| key.identity() != identity);
    }

    /// 导出全部统计的快照：先服务级、后方法级，各自按键排序。
    pub fn snapshot(&self) -> Vec<StatusSnapshot> {
        let mut services: Vec<StatusSnapshot> = self
            .services
            .iter()
            .map(|entry| StatusSnapshot::capture(entry.key(), None, entry.value()))
            .collect();
        services.sort_by(|a, b| a.identity.cmp(&b.identity));

        let mut methods: Vec<StatusSnapshot> = self
            .methods
            .iter()
            .map(|entry| {
                StatusSnapshot::capture(
                    entry.key().identity(),
                    Some(entry.key().method()),
                    entry.value(),
                )
            })
            .collect();
        methods.sort_by(|a, b| {
            a.identity
                .cmp(&b.identity)
                .then_with(|| a.method.cmp(&b.method))
        });

        services.extend(methods);
        services
    }
}

/// 一次已准入调用的作用域守卫。
///
/// - **契约 (What)**：创建时已登记开始；`finish` 标记结果并立即结束；直接丢弃（包括 panic 展开、
///   Future 被取消）按失败结束。结束登记先于许可释放执行。
#[derive(Debug)]
#[must_use = "dropping the guard immediately records the call as finished"]
pub struct CallGuard {
    service: Arc<RpcStatus>,
    method: Arc<RpcStatus>,
    started: Instant,
    succeeded: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl CallGuard {
    fn start(
        service: Arc<RpcStatus>,
        method: Arc<RpcStatus>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        method.begin();
        service.begin();
        Self {
            service,
            method,
            started: Instant::now(),
            succeeded: false,
            permit,
        }
    }

    /// 是否持有准入许可。
    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }

    /// 以给定结果结束调用。
    pub fn finish(mut self, succeeded: bool) {
        self.succeeded = succeeded;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.method.end(elapsed, self.succeeded);
        self.service.end(elapsed, self.succeeded);
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("com.acme.Greeter", None, Some("1.0"))
    }

    #[test]
    fn concurrent_first_access_creates_one_instance() {
        let registry = Arc::new(RpcStatusRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_status(&identity(), "foo")
                })
            })
            .collect();

        let statuses: Vec<Arc<RpcStatus>> = handles
            .into_iter()
            .map(|h| h.join().expect("线程不应 panic"))
            .collect();
        for status in &statuses {
            assert!(Arc::ptr_eq(status, &statuses[0]), "所有调用方必须拿到同一实例");
        }
    }

    #[test]
    fn guard_records_both_method_and_service_levels() {
        let registry = RpcStatusRegistry::new();
        let id = identity();

        registry.begin_call(&id, "foo", None).finish(true);
        let guard = registry.begin_call(&id, "bar", None);
        assert_eq!(registry.get_status(&id, "bar").active(), 1);
        assert_eq!(registry.get_status(&id, ANY_METHOD).active(), 1);
        guard.finish(false);

        let foo = registry.get_status(&id, "foo");
        let bar = registry.get_status(&id, "bar");
        let service = registry.get_service_status(&id);
        assert_eq!((foo.total(), foo.succeeded(), foo.failed()), (1, 1, 0));
        assert_eq!((bar.total(), bar.succeeded(), bar.failed()), (1, 0, 1));
        assert_eq!((service.total(), service.failed(), service.active()), (2, 1, 0));
        assert!(service.max_elapsed() >= bar.max_elapsed());
    }

    #[test]
    fn dropped_guard_counts_as_failure() {
        let registry = RpcStatusRegistry::new();
        let id = identity();
        {
            let _guard = registry.begin_call(&id, "foo", None);
        }
        let status = registry.get_status(&id, "foo");
        assert_eq!(status.active(), 0);
        assert_eq!(status.failed(), 1);
        assert_eq!(status.total(), 1);
    }

    #[test]
    fn semaphore_is_created_once_and_released_by_guard() {
        let registry = RpcStatusRegistry::new();
        let id = identity();
        let status = registry.get_status(&id, "foo");

        let permit = status.try_acquire(1).expect("首个许可应可获得");
        assert_eq!(status.permits(), Some(1));
        assert!(status.try_acquire(5).is_none(), "许可数在首次创建后固定");
        assert_eq!(status.permits(), Some(1));

        let guard = registry.begin_call(&id, "foo", Some(permit));
        assert!(guard.holds_permit());
        assert!(status.try_acquire(1).is_none());
        guard.finish(true);
        assert!(status.try_acquire(1).is_some(), "守卫结束后许可必须归还");
        assert_eq!(status.semaphore(1).available_permits(), 1);
    }

    #[test]
    fn snapshot_and_reset() {
        let registry = RpcStatusRegistry::new();
        let id = identity();
        registry.begin_call(&id, "foo", None).finish(true);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].method, None);
        assert_eq!(snapshot[1].method.as_deref(), Some("foo"));
        assert_eq!(snapshot[1].succeeded, 1);

        let old = registry.reset(&id, "foo").expect("已存在的统计应被移除");
        assert_eq!(old.total(), 1);
        assert_eq!(registry.get_status(&id, "foo").total(), 0);

        registry.reset_service(&id);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn averages_handle_empty_statistics() {
        let status = RpcStatus::new();
        assert_eq!(status.average_elapsed(), Duration::ZERO);
        assert_eq!(status.failed_average_elapsed(), Duration::ZERO);
        assert_eq!(status.succeeded_average_elapsed(), Duration::ZERO);
    }
}
