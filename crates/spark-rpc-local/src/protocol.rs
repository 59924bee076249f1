//! 进程内协议：导出、注销、引用，以及“是否走本地调用”的判定。

use std::sync::Arc;

use spark_rpc::{
    BoxInvoker, FilterChain, FilterRegistry, Invoker, RpcError, ServiceDescriptor, Side,
    keys::{GENERIC_KEY, LOCAL_PROTOCOL, LOCAL_PROTOCOL_FLAG_KEY, SCOPE_KEY, SCOPE_LOCAL, SCOPE_REMOTE},
};

use crate::{Exporter, ExporterRegistry, LocalInvoker};

/// `LocalProtocol` 管理同进程内导出的服务。
///
/// # 教案式说明
/// - **意图 (Why)**：服务端实现与消费端引用共享同一张 [`ExporterRegistry`]，
///   由协议负责在两端各自装配 Filter 链；
/// - **流程 (How)**：
///   - `export`：为实现 Invoker 组装服务端链路，以描述符服务键登记 Exporter；
///   - `refer`：构造 [`LocalInvoker`]，以消费端链路包裹后交给调用方；
///   - `unexport`/`destroy`：移出导出表并销毁被绑定的链路；
/// - **契约 (What)**：同键重复导出返回 [`RpcError::DuplicateExport`]，且不会销毁调用方传入的 Invoker；
///   引用不要求服务已导出，导出状态在每次调用时判断。
pub struct LocalProtocol {
    exporters: Arc<ExporterRegistry>,
    filters: Arc<FilterRegistry>,
}

impl LocalProtocol {
    /// 协议名称。
    pub const NAME: &'static str = LOCAL_PROTOCOL;

    pub fn new(filters: Arc<FilterRegistry>) -> Self {
        Self::with_exporters(Arc::new(ExporterRegistry::new()), filters)
    }

    pub fn with_exporters(exporters: Arc<ExporterRegistry>, filters: Arc<FilterRegistry>) -> Self {
        Self { exporters, filters }
    }

    pub fn exporters(&self) -> &Arc<ExporterRegistry> {
        &self.exporters
    }

    pub fn export(&self, invoker: BoxInvoker) -> Result<Arc<Exporter>, RpcError> {
        let key = invoker.descriptor().service_key();
        if self.exporters.contains(&key) {
            return Err(RpcError::DuplicateExport { key });
        }
        let chain = self.filters.build_chain(invoker, Side::Provider)?;
        let exporter = Arc::new(Exporter::new(key.as_str(), Arc::new(chain)));
        self.exporters.register(Arc::clone(&exporter))?;
        tracing::info!(key = %key, "service exported to local protocol");
        Ok(exporter)
    }

    /// 注销并销毁；键不存在时返回 `false`。
    pub fn unexport(&self, key: &str) -> bool {
        match self.exporters.unregister(key) {
            Some(exporter) => {
                exporter.unexport();
                tracing::info!(key, "service unexported from local protocol");
                true
            }
            None => false,
        }
    }

    pub fn refer(&self, descriptor: ServiceDescriptor) -> Result<FilterChain, RpcError> {
        let invoker = LocalInvoker::new(descriptor, Arc::clone(&self.exporters));
        let chain = self.filters.build_chain(Arc::new(invoker), Side::Consumer)?;
        tracing::debug!(key = %chain.descriptor().service_key(), "local reference created");
        Ok(chain)
    }

    /// 判断一个引用是否应走进程内调用。
    ///
    /// 依次检查：`scope=local` 或 `injvm=true` 为真；`scope=remote` 为假；泛化调用为假；
    /// 否则以当前是否已有匹配的导出为准。
    pub fn is_local_reference(&self, descriptor: &ServiceDescriptor) -> bool {
        let scope = descriptor.parameter(SCOPE_KEY);
        if scope == Some(SCOPE_LOCAL) || descriptor.parameter_as(LOCAL_PROTOCOL_FLAG_KEY, false) {
            return true;
        }
        if scope == Some(SCOPE_REMOTE) {
            return false;
        }
        if descriptor
            .parameter(GENERIC_KEY)
            .is_some_and(|generic| !generic.eq_ignore_ascii_case("false"))
        {
            return false;
        }
        self.exporters
            .find(&descriptor.service_key(), descriptor.identity())
            .is_some()
    }

    /// 注销全部已导出的服务。
    pub fn destroy(&self) {
        for key in self.exporters.keys() {
            self.unexport(&key);
        }
    }
}
