use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use crate::{Invocation, InvocationResult, RpcError, ServiceDescriptor};

/// 对象层 Invoker 的共享句柄。
pub type BoxInvoker = Arc<dyn Invoker>;

/// `Invoker` 是“执行一次调用的方式”的多态抽象。
///
/// # 设计初衷（Why）
/// - 调用方、传输层与 Filter 链只面向这一组能力编程，不关心终端是进程内分发还是远程传输；
/// - Filter 链中的每一层同样实现本 trait，使“下一阶段”对每个 Filter 而言都只是一个 Invoker。
///
/// # 行为逻辑（How）
/// 1. `is_available` 供启动期检查与路由选择使用，必须是无副作用的快速判断；
/// 2. `invoke` 消费一个 [`Invocation`]，异步产出 [`InvocationResult`] 或 [`RpcError`]；
/// 3. `destroy` 释放终端资源，重复调用必须幂等。
///
/// # 契约说明（What）
/// - **线程安全**：实现必须 `Send + Sync + 'static`，同一实例会被多个任务并发调用；
/// - **所有权**：`invoke` 按值接收调用对象，调用方移交后不再访问；
/// - **错误语义**：已识别的失败使用 [`RpcError`] 的具体变体，外来失败使用 [`RpcError::Foreign`]。
///
/// # 风险与取舍（Trade-offs）
/// - 采用 `async_trait` 换取对象安全，代价是每次调用一次 `Box` 分配；
/// - 若实现持有可变状态，请自行通过原子类型或锁保护。
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    /// 该 Invoker 服务的描述符。
    fn descriptor(&self) -> &ServiceDescriptor;

    /// 当前是否可以接收调用。
    fn is_available(&self) -> bool;

    /// 执行一次调用。
    async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError>;

    /// 销毁 Invoker，释放其持有的资源。
    fn destroy(&self);
}

/// Invoker 实现共用的基础状态：描述符与“已销毁”标记。
///
/// - **契约 (What)**：`destroy` 仅第一次返回 `true`，便于实现者把清理逻辑限定为一次；
///   销毁后 `is_available` 恒为 `false`，`ensure_alive` 返回 [`RpcError::InvokerDestroyed`]。
#[derive(Debug)]
pub struct InvokerState {
    descriptor: ServiceDescriptor,
    destroyed: AtomicBool,
}

impl InvokerState {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn is_available(&self) -> bool {
        !self.is_destroyed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 标记销毁；只有首次调用返回 `true`。
    pub fn destroy(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn ensure_alive(&self) -> Result<(), RpcError> {
        if self.is_destroyed() {
            return Err(RpcError::InvokerDestroyed {
                service: self.descriptor.service_key(),
            });
        }
        Ok(())
    }
}
