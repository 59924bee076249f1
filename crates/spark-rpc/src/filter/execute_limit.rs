//! 服务端准入控制：按方法限制并发执行数，并记录调用结果统计。

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;

use crate::{
    Invocation, InvocationResult, Invoker, RpcError, RpcStatusRegistry,
    filter::{Activation, Filter, Side},
    keys::EXECUTES_KEY,
};

/// `ExecuteLimitFilter` 以非阻塞许可约束每服务每方法的并发执行数。
///
/// # 教案式说明
/// - **意图（Why）**：过载时立即拒绝而不是排队，避免无界等待拖垮工作线程；同时为监控协作方
///   记录活跃数、成功/失败数与耗时。
/// - **流程（How）**：
///   1. 读取方法级 `executes` 上限，`0` 或缺省表示不限；
///   2. 有上限时从 [`RpcStatusRegistry`] 取得该方法的信号量并 `try_acquire`，失败即返回
///      [`RpcError::ConcurrencyLimitExceeded`]，不登记任何统计、不调用下一阶段；
///   3. 登记开始（[`crate::CallGuard`]），调用下一阶段并捕获 panic；
///   4. 外来失败与 panic 包装为 [`RpcError::UnexpectedInvocationFailure`]，已识别错误原样透传；
///   5. 守卫结束时恰好一次地登记结果并归还许可，Future 被中途丢弃时同样成立。
/// - **契约（What）**：仅在服务端且描述符出现 `executes`（服务级或方法级）时激活。
#[derive(Clone, Debug)]
pub struct ExecuteLimitFilter {
    statuses: Arc<RpcStatusRegistry>,
}

impl ExecuteLimitFilter {
    /// 注册名称。
    pub const NAME: &'static str = "executes";

    pub fn new(statuses: Arc<RpcStatusRegistry>) -> Self {
        Self { statuses }
    }

    /// 缺省激活条件：服务端，且配置了 `executes`。
    pub fn activation() -> Activation {
        Activation::new().on(Side::Provider).when_key(EXECUTES_KEY)
    }

    pub fn statuses(&self) -> &Arc<RpcStatusRegistry> {
        &self.statuses
    }
}

#[async_trait]
impl Filter for ExecuteLimitFilter {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: Invocation,
    ) -> Result<InvocationResult, RpcError> {
        let descriptor = next.descriptor();
        let identity = descriptor.identity();
        let method = invocation.method_name().to_owned();
        let max = descriptor.method_parameter_as(&method, EXECUTES_KEY, 0u32);

        let permit = if max > 0 {
            let status = self.statuses.get_status(identity, &method);
            match status.try_acquire(max) {
                Some(permit) => Some(permit),
                None => {
                    tracing::warn!(
                        service = %identity,
                        method = %method,
                        max,
                        "concurrency limit exceeded, rejecting invocation"
                    );
                    return Err(RpcError::ConcurrencyLimitExceeded {
                        service: identity.service_key(),
                        method,
                        max,
                    });
                }
            }
        } else {
            None
        };

        let guard = self.statuses.begin_call(identity, &method, permit);
        let outcome = AssertUnwindSafe(next.invoke(invocation))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(error.into_recognized(Self::NAME)),
            Err(panic) => Err(RpcError::from_panic(Self::NAME, panic)),
        };
        guard.finish(result.is_ok());

        if let Err(RpcError::UnexpectedInvocationFailure { source, .. }) = &result {
            tracing::error!(
                service = %identity,
                method = %method,
                error = %source,
                "unexpected failure while executing invocation"
            );
        }
        result
    }
}
