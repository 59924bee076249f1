//! 扩展解析协作方：名称 → 实现的查找表，以及基于描述符参数的自适应选择。
//!
//! # 教案式说明
//! - **意图（Why）**：调用核心只需要“按名称取实现”与“按描述符参数取实现”两种能力，
//!   无需任何注解扫描或反射；实现集合在启动期由宿主一次性注册。
//! - **结构（How）**：每个扩展点以一个实现了 [`ExtensionPoint`] 的 trait 对象类型表示，
//!   [`ExtensionLoader`] 以 `DashMap` 保存该扩展点下的全部实现。
//! - **契约（What）**：
//!   - [`ExtensionLoader::resolve`]：按名称解析，`"true"`/`"default"` 代表缺省实现；
//!   - [`ExtensionLoader::resolve_adaptive`]：读取扩展点声明的自适应参数键，缺省回落到缺省实现；
//!   - 未注册的名称返回 [`RpcError::ExtensionNotFound`]。
//! - **风险提示（Trade-offs）**：注册与解析可以并发进行，但同名重复注册会覆盖旧实现，
//!   已解析出的旧实例仍由调用方持有直至释放。

use std::sync::Arc;

use dashmap::DashMap;

use crate::{RpcError, ServiceDescriptor};

/// 扩展点的静态声明。
///
/// 通常为 trait 对象类型实现，例如 `impl ExtensionPoint for dyn CacheFactory`。
pub trait ExtensionPoint: Send + Sync + 'static {
    /// 扩展点名称，用于错误信息与日志。
    const KIND: &'static str;
    /// 缺省实现名称。
    const DEFAULT_NAME: Option<&'static str> = None;
    /// 自适应解析读取的描述符参数键。
    const ADAPTIVE_KEY: Option<&'static str> = None;
}

/// 单个扩展点的实现注册表。
pub struct ExtensionLoader<T>
where
    T: ?Sized + ExtensionPoint,
{
    extensions: DashMap<Arc<str>, Arc<T>>,
}

impl<T> ExtensionLoader<T>
where
    T: ?Sized + ExtensionPoint,
{
    pub fn new() -> Self {
        Self {
            extensions: DashMap::new(),
        }
    }

    /// 注册实现，返回同名的旧实现（如有）。
    pub fn register(&self, name: &str, extension: Arc<T>) -> Option<Arc<T>> {
        tracing::debug!(kind = T::KIND, name, "extension registered");
        self.extensions.insert(Arc::from(name), extension)
    }

    /// 以链式写法注册，便于启动期装配。
    pub fn with(self, name: &str, extension: Arc<T>) -> Self {
        self.register(name, extension);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// 已注册的实现名称（排序后）。
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .extensions
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        names.sort();
        names
    }

    /// 把 `"true"`/`"default"` 别名折算为缺省实现名称，其余名称原样返回。
    pub fn canonical_name(name: &str) -> &str {
        match name {
            "true" | "default" => T::DEFAULT_NAME.unwrap_or(name),
            other => other,
        }
    }

    /// 方法级自适应解析最终查找的实现名称（已折算别名）。
    pub fn adaptive_name_for_method<'a>(descriptor: &'a ServiceDescriptor, method: &str) -> &'a str {
        let selected = T::ADAPTIVE_KEY.and_then(|key| descriptor.method_parameter(method, key));
        Self::canonical_name(selected.or(T::DEFAULT_NAME).unwrap_or_default())
    }

    /// 按名称解析实现。
    pub fn resolve(&self, name: &str) -> Result<Arc<T>, RpcError> {
        let name = Self::canonical_name(name);
        self.extensions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RpcError::ExtensionNotFound {
                kind: T::KIND,
                name: name.to_owned(),
            })
    }

    /// 解析缺省实现。
    pub fn resolve_default(&self) -> Result<Arc<T>, RpcError> {
        self.resolve(T::DEFAULT_NAME.unwrap_or_default())
    }

    /// 根据描述符的服务级参数自适应解析。
    pub fn resolve_adaptive(&self, descriptor: &ServiceDescriptor) -> Result<Arc<T>, RpcError> {
        let selected = T::ADAPTIVE_KEY.and_then(|key| descriptor.parameter(key));
        self.resolve_selected(selected)
    }

    /// 根据描述符的方法级参数自适应解析（`"{method}.{key}"` 优先）。
    pub fn resolve_adaptive_for_method(
        &self,
        descriptor: &ServiceDescriptor,
        method: &str,
    ) -> Result<Arc<T>, RpcError> {
        let name = Self::adaptive_name_for_method(descriptor, method);
        tracing::trace!(kind = T::KIND, name, method, "adaptive extension resolution");
        self.resolve(name)
    }

    fn resolve_selected(&self, selected: Option<&str>) -> Result<Arc<T>, RpcError> {
        let name = selected.or(T::DEFAULT_NAME).unwrap_or_default();
        tracing::trace!(kind = T::KIND, name, "adaptive extension resolution");
        self.resolve(name)
    }
}

impl<T> Default for ExtensionLoader<T>
where
    T: ?Sized + ExtensionPoint,
{
    fn default() -> Self {
        Self::new()
    }
}
