//! 导出表：服务键 → 本地执行该服务的 Invoker。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use spark_rpc::{BoxInvoker, RpcError, ServiceIdentity};

/// 把服务键绑定到真正执行调用的 Invoker。
///
/// - **契约 (What)**：`unexport` 只在首次调用时销毁绑定的 Invoker，之后为空操作；
///   从导出表移除由 [`ExporterRegistry::unregister`] 负责，两者互不隐含。
pub struct Exporter {
    key: Arc<str>,
    invoker: BoxInvoker,
    unexported: AtomicBool,
}

impl Exporter {
    pub fn new(key: impl Into<Arc<str>>, invoker: BoxInvoker) -> Self {
        Self {
            key: key.into(),
            invoker,
            unexported: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn invoker(&self) -> &BoxInvoker {
        &self.invoker
    }

    pub fn is_unexported(&self) -> bool {
        self.unexported.load(Ordering::Acquire)
    }

    /// 销毁绑定的 Invoker；返回本次是否真正执行了销毁。
    pub fn unexport(&self) -> bool {
        if self.unexported.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.invoker.destroy();
        true
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("key", &self.key)
            .field("service", &self.invoker.descriptor().identity())
            .field("unexported", &self.is_unexported())
            .finish()
    }
}

/// 进程内共享的导出表。
///
/// # 教案式说明
/// - **意图 (Why)**：本地 Invoker 在每次调用时都要查表，写入只发生在导出/注销生命周期中，
///   分片并发表保证读写并行时不会读到撕裂的状态；
/// - **契约 (What)**：
///   - [`register`](Self::register) 以 Exporter 自带的键登记，同键重复登记返回
///     [`RpcError::DuplicateExport`]；
///   - [`lookup`](Self::lookup) 为精确查找，[`find`](Self::find) 在精确查找失败且查询身份含 `*`
///     时扫描整表做通配匹配；
/// - **风险 (Trade-offs)**：通配扫描为线性复杂度，只在分组或版本写作 `*` 时才会触发。
#[derive(Debug, Default)]
pub struct ExporterRegistry {
    exporters: DashMap<Arc<str>, Arc<Exporter>>,
}

impl ExporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, exporter: Arc<Exporter>) -> Result<(), RpcError> {
        match self.exporters.entry(Arc::clone(&exporter.key)) {
            Entry::Occupied(_) => Err(RpcError::DuplicateExport {
                key: exporter.key().to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(exporter);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, key: &str) -> Option<Arc<Exporter>> {
        self.exporters.remove(key).map(|(_, exporter)| exporter)
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Exporter>> {
        self.exporters
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 先按键精确查找；查询身份包含通配分量时再按身份匹配。
    pub fn find(&self, key: &str, identity: &ServiceIdentity) -> Option<Arc<Exporter>> {
        if let Some(exporter) = self.lookup(key) {
            return Some(exporter);
        }
        if !identity.is_wildcard() {
            return None;
        }
        self.exporters
            .iter()
            .find(|entry| identity.matches(entry.value().invoker().descriptor().identity()))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.exporters.contains_key(key)
    }

    /// 已登记的服务键（排序后）。
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .exporters
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}
