//! ServiceDescriptor：贯穿整条调用链路的不可变服务描述。
//!
//! # 教案式说明
//! - **意图（Why）**：协议、端点与参数表在服务配置阶段一次性确定，随后被 Invoker、Filter、
//!   准入控制与缓存解析并发读取；把它们收敛为不可变值可以免去任何同步成本。
//! - **结构（How）**：对外暴露 [`ServiceDescriptor`]（内部以 `Arc` 共享，克隆为常数时间）
//!   与 [`ServiceIdentity`]（`interface + group + version`，用作注册表键，不含主机与端口）；
//!   同时支持 `protocol://host:port/interface?k=v` 文本形式与 `serde` 配置文档。
//! - **契约（What）**：描述符创建后不可修改；[`ServiceDescriptor::with_parameter`] 返回新实例。
//! - **风险提示（Trade-offs）**：文本形式对接口名与参数做百分号编码，`group`、`version`
//!   两个键始终归入服务身份，不会作为普通参数出现。

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{ANY_VALUE, GROUP_KEY, VERSION_KEY};

/// 文本形式中需要转义的字符：分隔符、百分号与空白。
const COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'?');

/// 服务身份：`(interface, group, version)` 三元组。
///
/// - **契约 (What)**：空字符串的分组或版本被视为缺省；`Display` 输出即服务键
///   `group/interface:version`（缺省部分省略）。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentity {
    interface: Arc<str>,
    group: Option<Arc<str>>,
    version: Option<Arc<str>>,
}

impl ServiceIdentity {
    pub fn new(interface: &str, group: Option<&str>, version: Option<&str>) -> Self {
        Self {
            interface: Arc::from(interface),
            group: non_empty(group).map(Arc::from),
            version: non_empty(version).map(Arc::from),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// 渲染服务键，即进程内导出表的缺省键。
    pub fn service_key(&self) -> String {
        self.to_string()
    }

    /// 以当前身份为“查询条件”匹配另一个已导出的身份。
    ///
    /// - 接口名必须相同；
    /// - 分组或版本为 `*` 时匹配任意值，否则必须相等（缺省只匹配缺省）。
    pub fn matches(&self, exported: &ServiceIdentity) -> bool {
        fn component_matches(query: Option<&str>, exported: Option<&str>) -> bool {
            query == Some(ANY_VALUE) || query == exported
        }

        self.interface == exported.interface
            && component_matches(self.group(), exported.group())
            && component_matches(self.version(), exported.version())
    }

    /// 身份中是否包含通配符。
    pub fn is_wildcard(&self) -> bool {
        self.group() == Some(ANY_VALUE) || self.version() == Some(ANY_VALUE)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = self.group() {
            write!(f, "{group}/")?;
        }
        f.write_str(self.interface())?;
        if let Some(version) = self.version() {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

/// 不可变的服务描述符。
///
/// # 教案式说明
/// - **意图 (Why)**：作为 Invoker 的“地址 + 配置”载体，在全链路只读共享；
/// - **契约 (What)**：
///   - 参数读取为纯函数，不存在任何修改入口；
///   - 方法级参数以 `"{method}.{key}"` 表达，读取时优先于同名的服务级参数；
///   - 类型化读取遇到无法解析的值时返回缺省值并记录 `warn` 事件；
///   - 以 `group`、`version` 为键的参数写入服务身份，参数表中不会出现这两个键；
///   - 相等与哈希覆盖协议、端点、身份与全部参数，可直接用作注册表键；
/// - **风险 (Trade-offs)**：方法级查找需要拼接一次键字符串，热路径上若有顾虑可由调用方缓存结果。
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "DescriptorDocument", into = "DescriptorDocument")]
pub struct ServiceDescriptor {
    inner: Arc<DescriptorInner>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct DescriptorInner {
    protocol: String,
    host: String,
    port: u16,
    identity: ServiceIdentity,
    parameters: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// 以协议与接口名开始构建描述符。
    pub fn builder(
        protocol: impl Into<String>,
        interface: impl Into<String>,
    ) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            protocol: protocol.into(),
            host: String::new(),
            port: 0,
            interface: interface.into(),
            group: None,
            version: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn interface(&self) -> &str {
        self.inner.identity.interface()
    }

    pub fn group(&self) -> Option<&str> {
        self.inner.identity.group()
    }

    pub fn version(&self) -> Option<&str> {
        self.inner.identity.version()
    }

    /// 注册表使用的服务身份（不含主机与端口）。
    pub fn identity(&self) -> &ServiceIdentity {
        &self.inner.identity
    }

    /// 服务键，`group/interface:version`。
    pub fn service_key(&self) -> String {
        self.inner.identity.service_key()
    }

    /// 读取服务级参数，空值视为缺省。
    pub fn parameter(&self, key: &str) -> Option<&str> {
        non_empty(self.inner.parameters.get(key).map(String::as_str))
    }

    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(default)
    }

    /// 类型化读取服务级参数。
    pub fn parameter_as<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
    {
        parse_or_default(self.parameter(key), key, default)
    }

    /// 读取方法级参数：先查 `"{method}.{key}"`，再回落到服务级 `key`。
    pub fn method_parameter(&self, method: &str, key: &str) -> Option<&str> {
        let scoped = format!("{method}.{key}");
        self.parameter(&scoped).or_else(|| self.parameter(key))
    }

    /// 类型化读取方法级参数。
    pub fn method_parameter_as<T>(&self, method: &str, key: &str, default: T) -> T
    where
        T: FromStr,
    {
        parse_or_default(self.method_parameter(method, key), key, default)
    }

    /// 判断某个键是否以服务级或任意方法级形式出现且取值非空。
    ///
    /// Filter 的激活条件据此判断，例如仅为 `foo.executes` 配置上限时，准入过滤器同样需要装配。
    pub fn has_parameter_key(&self, key: &str) -> bool {
        self.inner.parameters.iter().any(|(name, value)| {
            !value.is_empty()
                && (name == key
                    || name
                        .strip_suffix(key)
                        .is_some_and(|prefix| prefix.ends_with('.')))
        })
    }

    /// 遍历全部参数（按键排序）。
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .parameters
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 返回追加（或覆盖）一个参数后的新描述符，原实例保持不变。
    ///
    /// 键为 `group` 或 `version` 时改写的是服务身份。
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let inner = &self.inner;
        ServiceDescriptorBuilder {
            protocol: inner.protocol.clone(),
            host: inner.host.clone(),
            port: inner.port,
            interface: inner.identity.interface().to_owned(),
            group: inner.identity.group().map(str::to_owned),
            version: inner.identity.version().map(str::to_owned),
            parameters: inner.parameters.clone(),
        }
        .parameter(key, value)
        .build()
    }
}

impl PartialEq for ServiceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for ServiceDescriptor {}

impl Hash for ServiceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("protocol", &self.inner.protocol)
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("identity", &self.inner.identity)
            .field("parameters", &self.inner.parameters)
            .finish()
    }
}

/// 输出完整文本形式，参数按键排序，键与值均做百分号编码，可由 [`FromStr`] 无损解析。
impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.inner.protocol,
            self.inner.host,
            self.inner.port,
            utf8_percent_encode(self.interface(), COMPONENT)
        )?;

        let mut query: BTreeMap<&str, &str> = self.parameters().collect();
        if let Some(group) = self.group() {
            query.insert(GROUP_KEY, group);
        }
        if let Some(version) = self.version() {
            query.insert(VERSION_KEY, version);
        }

        let mut separator = '?';
        for (key, value) in query {
            write!(
                f,
                "{separator}{}={}",
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(value, COMPONENT)
            )?;
            separator = '&';
        }
        Ok(())
    }
}

/// 文本形式解析失败。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("malformed service descriptor `{input}`: {reason}")]
pub struct DescriptorParseError {
    input: String,
    reason: &'static str,
}

impl FromStr for ServiceDescriptor {
    type Err = DescriptorParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fail = |reason| DescriptorParseError {
            input: input.to_owned(),
            reason,
        };
        let decode = |raw: &str| {
            percent_decode_str(raw)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| fail("invalid percent-encoding"))
        };

        let (protocol, rest) = input.split_once("://").ok_or_else(|| fail("missing `://`"))?;
        if protocol.is_empty() {
            return Err(fail("empty protocol"));
        }
        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (authority, interface) = location
            .split_once('/')
            .ok_or_else(|| fail("missing service interface"))?;
        if interface.is_empty() {
            return Err(fail("missing service interface"));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| fail("invalid port"))?,
            ),
            None => (authority, 0),
        };

        let mut builder = ServiceDescriptor::builder(protocol, decode(interface)?)
            .host(host)
            .port(port);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            builder = builder.parameter(decode(key)?, decode(value)?);
        }
        Ok(builder.build())
    }
}

/// [`ServiceDescriptor`] 的构建器。
#[derive(Clone, Debug)]
pub struct ServiceDescriptorBuilder {
    protocol: String,
    host: String,
    port: u16,
    interface: String,
    group: Option<String>,
    version: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl ServiceDescriptorBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 追加参数；`group`、`version` 两个键等价于调用同名的身份设置方法。
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        match key.as_str() {
            GROUP_KEY => self.group(value),
            VERSION_KEY => self.version(value),
            _ => {
                self.parameters.insert(key, value.into());
                self
            }
        }
    }

    pub fn build(mut self) -> ServiceDescriptor {
        // 文档装载可能把身份写进参数表；显式字段优先。
        if let Some(group) = self.parameters.remove(GROUP_KEY) {
            self.group.get_or_insert(group);
        }
        if let Some(version) = self.parameters.remove(VERSION_KEY) {
            self.version.get_or_insert(version);
        }
        let identity = ServiceIdentity::new(
            &self.interface,
            self.group.as_deref(),
            self.version.as_deref(),
        );
        ServiceDescriptor {
            inner: Arc::new(DescriptorInner {
                protocol: self.protocol,
                host: self.host,
                port: self.port,
                identity,
                parameters: self.parameters,
            }),
        }
    }
}

/// 配置文档形态，供宿主从 TOML/JSON 等格式装载描述符。
#[derive(Serialize, Deserialize)]
struct DescriptorDocument {
    protocol: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

impl From<DescriptorDocument> for ServiceDescriptor {
    fn from(document: DescriptorDocument) -> Self {
        let mut builder = ServiceDescriptor::builder(document.protocol, document.interface)
            .host(document.host)
            .port(document.port);
        builder.group = document.group;
        builder.version = document.version;
        builder.parameters = document.parameters;
        builder.build()
    }
}

impl From<ServiceDescriptor> for DescriptorDocument {
    fn from(descriptor: ServiceDescriptor) -> Self {
        Self {
            protocol: descriptor.inner.protocol.clone(),
            host: descriptor.inner.host.clone(),
            port: descriptor.inner.port,
            interface: descriptor.interface().to_owned(),
            group: descriptor.group().map(str::to_owned),
            version: descriptor.version().map(str::to_owned),
            parameters: descriptor.inner.parameters.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn parse_or_default<T>(raw: Option<&str>, key: &str, default: T) -> T
where
    T: FromStr,
{
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = raw, "unparsable descriptor parameter, using default");
            default
        }),
    }
}
