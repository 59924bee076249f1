//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义调用核心对外暴露的错误语义：准入拒绝、本地服务缺失、非预期失败等；
//! - 区分“已识别的 RPC 错误”与“外来失败”，准入过滤器据此决定透传还是包装。
//!
//! ## 设计要求（What）
//! - 所有变体派生 [`thiserror::Error`]，可直接交给 `anyhow`/`eyre` 等上层框架处理；
//! - 外来失败以 [`BoxError`] 保存，并通过 `#[source]` 保留原始错误链。

use std::{any::Any, borrow::Cow, fmt};

use thiserror::Error;

/// 跨线程传播的动态错误类型。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 调用核心的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把 Filter 链、准入控制、进程内分发可能产生的失败收敛为一个可匹配的枚举，
///   调用方无需依赖字符串判断失败类别；
/// - **契约 (What)**：
///   - 除 [`RpcError::Foreign`] 外的变体均视为“已识别”，Filter 应原样透传；
///   - [`RpcError::Foreign`] 表示终端 Invoker 抛出的外来失败，准入过滤器会将其包装为
///     [`RpcError::UnexpectedInvocationFailure`]；
/// - **风险 (Trade-offs)**：`BoxError` 不可克隆，因此本枚举不实现 `Clone`；需要广播错误时请转为字符串。
#[derive(Debug, Error)]
pub enum RpcError {
    /// 非阻塞准入失败：方法的并发执行数已达上限。
    ///
    /// - **契约 (What)**：`service` 为服务标识，`method` 为方法名，`max` 为配置的上限；
    /// - **风险 (Trade-offs)**：调用核心不做重试，调用方应退避或在上游快速失败。
    #[error(
        "failed to invoke method `{method}` of service `{service}`: concurrent executions exceed the configured limit of {max}"
    )]
    ConcurrencyLimitExceeded {
        service: String,
        method: String,
        max: u32,
    },

    /// 进程内分发目标缺失，通常意味着服务尚未导出或已被注销。
    #[error("service [{key}] not found")]
    ServiceNotFound { key: String },

    /// Invoker 已被销毁，拒绝继续处理请求。
    #[error("invoker for service `{service}` has been destroyed")]
    InvokerDestroyed { service: String },

    /// 同一服务键被重复导出。
    #[error("service [{key}] has already been exported")]
    DuplicateExport { key: String },

    /// 扩展解析失败：指定扩展点下不存在该名称的实现。
    #[error("no `{kind}` extension registered under name `{name}`")]
    ExtensionNotFound { kind: &'static str, name: String },

    /// 对非识别失败的包装，保留原始原因以便排障。
    ///
    /// - **契约 (What)**：`context` 描述包装发生的位置（例如 `"executes"`），`source` 为原始错误。
    #[error("unexpected failure in `{context}`")]
    UnexpectedInvocationFailure {
        context: Cow<'static, str>,
        #[source]
        source: BoxError,
    },

    /// 终端 Invoker 抛出的外来失败，尚未被识别为 RPC 错误。
    #[error("foreign invocation failure: {source}")]
    Foreign {
        #[source]
        source: BoxError,
    },
}

impl RpcError {
    /// 将任意错误包装为外来失败。
    pub fn foreign<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        RpcError::Foreign {
            source: error.into(),
        }
    }

    /// 是否为已识别的 RPC 错误。
    pub fn is_recognized(&self) -> bool {
        !matches!(self, RpcError::Foreign { .. })
    }

    /// 已识别错误原样返回，外来失败包装为 [`RpcError::UnexpectedInvocationFailure`]。
    pub fn into_recognized(self, context: impl Into<Cow<'static, str>>) -> Self {
        match self {
            RpcError::Foreign { source } => RpcError::UnexpectedInvocationFailure {
                context: context.into(),
                source,
            },
            recognized => recognized,
        }
    }

    /// 将 panic 负载转换为带原因的非预期失败。
    pub fn from_panic(
        context: impl Into<Cow<'static, str>>,
        payload: Box<dyn Any + Send + 'static>,
    ) -> Self {
        RpcError::UnexpectedInvocationFailure {
            context: context.into(),
            source: Box::new(PanicError::from_payload(payload)),
        }
    }
}

/// 捕获到的 panic，携带可读消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    fn from_payload(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "panic with non-string payload".to_owned()
        };
        Self { message }
    }

    /// panic 消息。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invoker panicked: {}", self.message)
    }
}

impl std::error::Error for PanicError {}
