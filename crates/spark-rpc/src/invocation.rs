//! 单次调用的值对象：[`Invocation`] 与 [`InvocationResult`]。
//!
//! - `Invocation` 按值交给 Invoker，移交之后只有附件与远端地址允许被 Filter 改写；
//! - `InvocationResult` 由终端 Invoker 产出，之后不再变化。

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use serde_json::Value;

/// 调用级附件：字符串键值对，随调用在 Filter 之间传递。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attachments {
    entries: BTreeMap<String, String>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 写入附件，返回被覆盖的旧值。
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// 一次方法调用。
///
/// # 教案式说明
/// - **意图 (Why)**：把方法名、参数签名、实参与调用级元数据打包为一个可移交所有权的值，
///   调用线程在交给 Invoker 之前独占它，之后由链路逐级按值传递，天然避免共享可变状态；
/// - **契约 (What)**：
///   - 方法名、参数类型与实参在构建后只读；
///   - [`Invocation::attachments_mut`] 与 [`Invocation::set_remote_address`] 是仅有的改写入口；
///   - `remote_address` 以 `SocketAddr` 内联保存，写入不产生堆分配。
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    method_name: Arc<str>,
    parameter_types: Vec<Arc<str>>,
    arguments: Vec<Value>,
    attachments: Attachments,
    remote_address: Option<SocketAddr>,
}

impl Invocation {
    pub fn new(method_name: &str) -> Self {
        Self {
            method_name: Arc::from(method_name),
            parameter_types: Vec::new(),
            arguments: Vec::new(),
            attachments: Attachments::new(),
            remote_address: None,
        }
    }

    pub fn with_parameter_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parameter_types = types.into_iter().map(|t| Arc::from(t.as_ref())).collect();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key, value);
        self
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameter_types(&self) -> impl ExactSizeIterator<Item = &str> {
        self.parameter_types.iter().map(|t| t.as_ref())
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut Attachments {
        &mut self.attachments
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key)
    }

    /// 调用实际生效的远端地址；进程内分发时为回环标记。
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    pub fn set_remote_address(&mut self, address: SocketAddr) {
        self.remote_address = Some(address);
    }
}

/// 终端 Invoker 的产出：返回值或业务异常标记。
///
/// 业务异常属于“调用已完成”的结果，与 [`crate::RpcError`] 描述的调用失败相互独立。
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationResult {
    Value(Value),
    Exception { kind: String, message: String },
}

impl InvocationResult {
    pub fn value(value: impl Into<Value>) -> Self {
        InvocationResult::Value(value.into())
    }

    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Self {
        InvocationResult::Exception {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn has_exception(&self) -> bool {
        matches!(self, InvocationResult::Exception { .. })
    }

    /// 返回值；业务异常时为 `None`。
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            InvocationResult::Value(value) => Some(value),
            InvocationResult::Exception { .. } => None,
        }
    }
}
