//! # spark-rpc
//!
//! ## 定位与职责（Why）
//! - 提供 RPC 框架调用路径的核心契约：一次调用如何被描述（[`Invocation`]）、如何被执行
//!   （[`Invoker`]）、如何被横切逻辑包裹（[`Filter`] 与 [`FilterChain`]）；
//! - 维护每服务每方法的调用统计与非阻塞准入控制（[`RpcStatusRegistry`] 与 [`ExecuteLimitFilter`]）；
//! - 提供按名称与按描述符参数解析扩展实现的 [`ExtensionLoader`]。
//!
//! ## 架构嵌入（Where）
//! - `spark-rpc-local` 在本 crate 之上实现进程内（`injvm`）导出与引用；
//! - `spark-filter-cache` 以 [`ExtensionLoader`] 注册缓存工厂，并提供结果缓存 Filter；
//! - 传输、序列化、注册中心等外层能力不在本 crate 范围内，只通过 [`Invoker`] 接入。
//!
//! ## 运行时约束（Trade-offs）
//! - 仅依赖 Tokio 的 `sync` 原语，不绑定执行器；准入许可通过 `try_acquire` 非阻塞获取；
//! - 所有共享注册表（统计、Filter、扩展）均可跨线程并发访问，由宿主以 `Arc` 持有。

/// 服务描述符与服务身份。
pub mod descriptor;

/// 调用核心的统一错误域。
pub mod error;

/// 扩展点注册与自适应解析。
pub mod extension;

/// Filter 契约、激活规则与链路组装。
pub mod filter;

/// 调用对象与调用结果。
pub mod invocation;

/// Invoker 契约与共用状态。
pub mod invoker;

/// 描述符参数键与协议常量。
pub mod keys;

/// 调用统计与准入许可。
pub mod status;

pub use async_trait::async_trait;
pub use descriptor::{DescriptorParseError, ServiceDescriptor, ServiceDescriptorBuilder, ServiceIdentity};
pub use error::{BoxError, PanicError, RpcError};
pub use extension::{ExtensionLoader, ExtensionPoint};
pub use filter::{
    Activation, ExecuteLimitFilter, Filter, FilterChain, FilterInvoker, FilterRegistration,
    FilterRegistry, Side,
};
pub use invocation::{Attachments, Invocation, InvocationResult};
pub use invoker::{BoxInvoker, Invoker, InvokerState};
pub use status::{CallGuard, RpcStatus, RpcStatusRegistry, StatusKey, StatusSnapshot};
