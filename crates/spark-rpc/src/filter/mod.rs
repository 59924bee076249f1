//! Filter 子系统：横切行为（准入、缓存等）以可组合的拦截器形式包裹 Invoker。
//!
//! # 结构概览
//! - [`Filter`]：单个拦截器契约，看到的“下一阶段”总是一个 [`Invoker`]；
//! - [`Activation`]：激活谓词，按调用侧与描述符参数决定 Filter 是否装配；
//! - [`FilterRegistry`]：读多写少的注册表，`ArcSwap` 整表替换；
//! - [`FilterChain`]：一次性组装出的不可变链路，本身也是一个 Invoker。
//!
//! # 设计约束
//! - 链路在导出/引用时组装一次，之后每次调用复用，调用路径上不再评估激活谓词；
//! - 顺序由 `order` 稳定排序决定，`order` 相同时保持注册顺序；
//! - 销毁链路只会销毁终端 Invoker 一次。

pub mod execute_limit;

use std::{
    borrow::Cow,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::{
    BoxInvoker, Invocation, InvocationResult, Invoker, RpcError, ServiceDescriptor,
    keys::{DEFAULT_FILTER_NAME, REFERENCE_FILTER_KEY, REMOVE_VALUE_PREFIX, SERVICE_FILTER_KEY},
};

pub use execute_limit::ExecuteLimitFilter;

/// `Filter` 描述一次调用在某个横切关注点上的拦截逻辑。
///
/// # 设计初衷（Why）
/// - 让限流、缓存、上下文透传等逻辑在不修改调用点的前提下插入调用路径；
/// - 每个 Filter 把下一阶段视作普通 [`Invoker`]，因此可以决定继续、短路或转换错误。
///
/// # 契约说明（What）
/// - **输入**：`next` 为链路中的下一阶段，`invocation` 为按值移交的调用；
/// - **并发**：同一 Filter 实例会被并发调用，除显式共享的协作方（如 RpcStatus 仓储）外不得持有
///   跨调用的可变状态；
/// - **错误**：已识别的 [`RpcError`] 应原样透传。
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: Invocation,
    ) -> Result<InvocationResult, RpcError>;
}

/// 调用侧。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Provider,
    Consumer,
}

impl Side {
    /// 该侧显式 Filter 列表所在的参数键。
    pub fn filter_key(self) -> &'static str {
        match self {
            Side::Provider => SERVICE_FILTER_KEY,
            Side::Consumer => REFERENCE_FILTER_KEY,
        }
    }
}

/// Filter 的激活谓词与优先级。
///
/// - **契约 (What)**：`sides` 为空表示两侧都适用；`keys` 为空表示无参数要求，否则任一键以服务级或
///   方法级形式出现且非空即激活；`order` 越小越靠近调用方。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Activation {
    sides: Vec<Side>,
    keys: Vec<Cow<'static, str>>,
    order: i32,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, side: Side) -> Self {
        if !self.sides.contains(&side) {
            self.sides.push(side);
        }
        self
    }

    pub fn when_key(mut self, key: impl Into<Cow<'static, str>>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn priority(&self) -> i32 {
        self.order
    }

    /// 在给定调用侧与描述符下是否激活。
    pub fn applies(&self, side: Side, descriptor: &ServiceDescriptor) -> bool {
        let side_matches = self.sides.is_empty() || self.sides.contains(&side);
        let keys_match =
            self.keys.is_empty() || self.keys.iter().any(|key| descriptor.has_parameter_key(key));
        side_matches && keys_match
    }
}

/// 注册表中的一条 Filter 记录。
#[derive(Clone)]
pub struct FilterRegistration {
    name: Arc<str>,
    filter: Arc<dyn Filter>,
    activation: Activation,
}

impl FilterRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }
}

impl fmt::Debug for FilterRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistration")
            .field("name", &self.name)
            .field("activation", &self.activation)
            .finish()
    }
}

/// Filter 注册表：读路径零锁，写路径整表替换。
///
/// # 教案级说明
/// - **意图 (Why)**：Filter 在启动期注册、在每次导出/引用时读取，`ArcSwap` 让读取无需加锁；
/// - **流程 (How)**：注册时复制当前表并追加（同名则原位替换），再通过 `rcu` 原子替换；
/// - **后置条件 (Contract)**：新表对之后的链路组装立即可见，已组装的链路不受影响。
#[derive(Default)]
pub struct FilterRegistry {
    entries: ArcSwap<Vec<FilterRegistration>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或原位替换同名）Filter。
    pub fn register(&self, name: &str, filter: Arc<dyn Filter>, activation: Activation) {
        let registration = FilterRegistration {
            name: Arc::from(name),
            filter,
            activation,
        };
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|entry| entry.name() == name) {
                Some(slot) => *slot = registration.clone(),
                None => next.push(registration.clone()),
            }
            next
        });
        tracing::debug!(filter = name, "filter registered");
    }

    pub fn with(self, name: &str, filter: Arc<dyn Filter>, activation: Activation) -> Self {
        self.register(name, filter, activation);
        self
    }

    /// 当前注册的 Filter 名称（注册顺序）。
    pub fn names(&self) -> Vec<String> {
        self.entries
            .load()
            .iter()
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    /// 选出某一侧应装配的 Filter，按链路顺序返回。
    ///
    /// - 自动激活：满足 [`Activation::applies`] 且未被 `-name` 排除的 Filter，按 `order` 稳定排序；
    /// - 显式列表（`service.filter`/`reference.filter`）：`-default` 关闭全部自动激活，
    ///   普通名称追加在自动激活之后，出现在 `default` 之前的名称放在最前；
    /// - 显式列表中的未知名称返回 [`RpcError::ExtensionNotFound`]。
    pub fn select(
        &self,
        side: Side,
        descriptor: &ServiceDescriptor,
    ) -> Result<Vec<FilterRegistration>, RpcError> {
        let entries = self.entries.load();
        let names: Vec<&str> = descriptor
            .parameter(side.filter_key())
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let excluded = |name: &str| {
            names
                .iter()
                .any(|n| n.strip_prefix(REMOVE_VALUE_PREFIX) == Some(name))
        };

        let mut selected = Vec::new();
        if !excluded(DEFAULT_FILTER_NAME) {
            selected = entries
                .iter()
                .filter(|entry| {
                    !names.contains(&entry.name())
                        && !excluded(entry.name())
                        && entry.activation.applies(side, descriptor)
                })
                .cloned()
                .collect();
            selected.sort_by_key(|entry| entry.activation.order);
        }

        let mut explicit = Vec::new();
        for name in names.iter().copied() {
            if name.starts_with(REMOVE_VALUE_PREFIX) || excluded(name) {
                continue;
            }
            if name == DEFAULT_FILTER_NAME {
                explicit.append(&mut selected);
                selected = std::mem::take(&mut explicit);
                continue;
            }
            let entry = entries
                .iter()
                .find(|entry| entry.name() == name)
                .ok_or_else(|| RpcError::ExtensionNotFound {
                    kind: "filter",
                    name: name.to_owned(),
                })?;
            explicit.push(entry.clone());
        }
        selected.extend(explicit);
        Ok(selected)
    }

    /// 为终端 Invoker 组装某一侧的 Filter 链。
    pub fn build_chain(&self, terminal: BoxInvoker, side: Side) -> Result<FilterChain, RpcError> {
        let selected = self.select(side, terminal.descriptor())?;
        let chain = FilterChain::new(
            terminal,
            selected
                .into_iter()
                .map(|entry| (entry.name, entry.filter)),
        );
        tracing::debug!(
            service = %chain.descriptor().identity(),
            ?side,
            filters = ?chain.filter_names(),
            "filter chain composed"
        );
        Ok(chain)
    }
}

/// 以一个 Filter 包裹内层 Invoker。
pub struct FilterInvoker {
    filter: Arc<dyn Filter>,
    next: BoxInvoker,
}

impl FilterInvoker {
    pub fn new(filter: Arc<dyn Filter>, next: BoxInvoker) -> Self {
        Self { filter, next }
    }
}

#[async_trait]
impl Invoker for FilterInvoker {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.next.descriptor()
    }

    fn is_available(&self) -> bool {
        self.next.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
        self.filter.invoke(self.next.as_ref(), invocation).await
    }

    fn destroy(&self) {
        self.next.destroy();
    }
}

/// 组装完成的 Filter 链。
///
/// - **契约 (What)**：`invoke` 严格按链路顺序经过每个 Filter；`destroy` 幂等，只销毁终端 Invoker 一次。
pub struct FilterChain {
    head: BoxInvoker,
    filter_names: Vec<Arc<str>>,
    destroyed: AtomicBool,
}

impl FilterChain {
    /// 以给定顺序（第一个最靠近调用方）包裹终端 Invoker。
    pub fn new<I>(terminal: BoxInvoker, filters: I) -> Self
    where
        I: IntoIterator<Item = (Arc<str>, Arc<dyn Filter>)>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut filter_names = Vec::new();
        let mut head = terminal;
        for (name, filter) in filters.into_iter().rev() {
            filter_names.push(name);
            head = Arc::new(FilterInvoker::new(filter, head));
        }
        filter_names.reverse();
        Self {
            head,
            filter_names,
            destroyed: AtomicBool::new(false),
        }
    }

    /// 链路中 Filter 的名称，按调用顺序排列。
    pub fn filter_names(&self) -> Vec<&str> {
        self.filter_names.iter().map(|name| name.as_ref()).collect()
    }
}

#[async_trait]
impl Invoker for FilterChain {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.head.descriptor()
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.head.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
        self.head.invoke(invocation).await
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.head.destroy();
        }
    }
}
