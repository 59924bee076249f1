use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};

use async_trait::async_trait;
use spark_rpc::{Invocation, InvocationResult, Invoker, InvokerState, RpcError, ServiceDescriptor};

use crate::ExporterRegistry;

/// 进程内分发写入调用对象的远端地址标记。
pub const LOCAL_ADDRESS: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

/// `LocalInvoker` 通过共享导出表把调用直接交给同进程内的服务实现。
///
/// # 设计初衷（Why）
/// - 调用方与服务实现位于同一进程时绕过传输与序列化，不引入任何网络延迟；
/// - 导出表在每次调用时查询，因此服务在引用建立之后才导出、或中途注销，都能被及时感知。
///
/// # 行为逻辑（How）
/// 1. `is_available`：导出表中存在该键且自身未销毁；
/// 2. `invoke`：按键查找 Exporter（身份含 `*` 时允许通配匹配），找不到返回
///    [`RpcError::ServiceNotFound`]；找到后把远端地址设为 [`LOCAL_ADDRESS`] 并委托给其 Invoker。
///
/// # 契约说明（What）
/// - 调用路径除远端地址外不修改调用对象，也不做额外分配；
/// - 销毁后的调用返回 [`RpcError::InvokerDestroyed`]，不会触达导出表。
pub struct LocalInvoker {
    state: InvokerState,
    key: Arc<str>,
    exporters: Arc<ExporterRegistry>,
}

impl LocalInvoker {
    /// 以描述符的服务键作为查找键。
    pub fn new(descriptor: ServiceDescriptor, exporters: Arc<ExporterRegistry>) -> Self {
        let key = descriptor.service_key();
        Self::with_key(descriptor, key, exporters)
    }

    pub fn with_key(
        descriptor: ServiceDescriptor,
        key: impl Into<Arc<str>>,
        exporters: Arc<ExporterRegistry>,
    ) -> Self {
        Self {
            state: InvokerState::new(descriptor),
            key: key.into(),
            exporters,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    fn descriptor(&self) -> &ServiceDescriptor {
        self.state.descriptor()
    }

    fn is_available(&self) -> bool {
        self.exporters.contains(&self.key) && self.state.is_available()
    }

    async fn invoke(&self, mut invocation: Invocation) -> Result<InvocationResult, RpcError> {
        self.state.ensure_alive()?;
        let exporter = self
            .exporters
            .find(&self.key, self.state.descriptor().identity())
            .ok_or_else(|| RpcError::ServiceNotFound {
                key: self.key.to_string(),
            })?;
        invocation.set_remote_address(LOCAL_ADDRESS);
        exporter.invoker().invoke(invocation).await
    }

    fn destroy(&self) {
        if self.state.destroy() {
            tracing::debug!(key = %self.key, "local invoker destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::Exporter;

    /// 返回调用时观测到的远端地址。
    struct AddressEcho {
        state: InvokerState,
    }

    #[async_trait]
    impl Invoker for AddressEcho {
        fn descriptor(&self) -> &ServiceDescriptor {
            self.state.descriptor()
        }

        fn is_available(&self) -> bool {
            self.state.is_available()
        }

        async fn invoke(&self, invocation: Invocation) -> Result<InvocationResult, RpcError> {
            let address = invocation.remote_address().map(|addr| addr.to_string());
            Ok(InvocationResult::value(json!(address)))
        }

        fn destroy(&self) {
            self.state.destroy();
        }
    }

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::builder("injvm", "S").version("1.0").build()
    }

    #[test]
    fn availability_follows_the_export_lifecycle() {
        let exporters = Arc::new(ExporterRegistry::new());
        let invoker = LocalInvoker::new(descriptor(), Arc::clone(&exporters));
        assert_eq!(invoker.key(), "S:1.0");
        assert!(!invoker.is_available(), "导出前不可用");

        let provider = Arc::new(AddressEcho {
            state: InvokerState::new(descriptor()),
        });
        exporters
            .register(Arc::new(Exporter::new("S:1.0", provider)))
            .expect("登记应成功");
        assert!(invoker.is_available(), "导出后可用");

        exporters.unregister("S:1.0");
        assert!(!invoker.is_available(), "注销后不可用");
    }

    #[test]
    fn dispatch_marks_the_loopback_address() {
        let exporters = Arc::new(ExporterRegistry::new());
        let provider = Arc::new(AddressEcho {
            state: InvokerState::new(descriptor()),
        });
        exporters
            .register(Arc::new(Exporter::new("S:1.0", provider)))
            .expect("登记应成功");

        let invoker = LocalInvoker::new(descriptor(), exporters);
        let result = block_on(invoker.invoke(Invocation::new("ping"))).expect("调用应成功");
        assert_eq!(result.as_value(), Some(&json!("127.0.0.1:0")));
    }

    #[test]
    fn destroyed_invoker_refuses_calls() {
        let exporters = Arc::new(ExporterRegistry::new());
        let invoker = LocalInvoker::new(descriptor(), exporters);
        invoker.destroy();
        invoker.destroy();

        let err = block_on(invoker.invoke(Invocation::new("ping"))).expect_err("销毁后必须失败");
        assert!(matches!(err, RpcError::InvokerDestroyed { .. }));
    }
}
