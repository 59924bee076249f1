//! 描述符参数键与协议常量。
//!
//! 调用核心不负责加载配置，所有可调行为都通过 [`crate::ServiceDescriptor`] 的参数表读取；
//! 这里集中声明这些键，避免字符串散落在各个模块中。

/// 每服务每方法的最大并发执行数，`0` 或缺省表示不限制。
pub const EXECUTES_KEY: &str = "executes";

/// 结果缓存实现的选择器。
pub const CACHE_KEY: &str = "cache";

/// 缓存选择器缺省时使用的实现名称。
pub const DEFAULT_CACHE: &str = "lru";

/// 服务端显式声明的 Filter 列表。
pub const SERVICE_FILTER_KEY: &str = "service.filter";

/// 消费端显式声明的 Filter 列表。
pub const REFERENCE_FILTER_KEY: &str = "reference.filter";

/// Filter 列表中代表“全部自动激活的 Filter”的占位名。
pub const DEFAULT_FILTER_NAME: &str = "default";

/// Filter 列表中用于排除某个 Filter 的前缀。
pub const REMOVE_VALUE_PREFIX: char = '-';

/// 引用范围：`local` 或 `remote`。
pub const SCOPE_KEY: &str = "scope";

/// 本地引用范围取值。
pub const SCOPE_LOCAL: &str = "local";

/// 远程引用范围取值。
pub const SCOPE_REMOTE: &str = "remote";

/// 显式要求进程内引用。
pub const LOCAL_PROTOCOL_FLAG_KEY: &str = "injvm";

/// 泛化调用标记，泛化引用不走进程内快捷路径。
pub const GENERIC_KEY: &str = "generic";

/// 进程内协议名称。
pub const LOCAL_PROTOCOL: &str = "injvm";

/// 描述符文本形式中的分组键。
pub const GROUP_KEY: &str = "group";

/// 描述符文本形式中的版本键。
pub const VERSION_KEY: &str = "version";

/// 分组/版本通配符。
pub const ANY_VALUE: &str = "*";

/// 服务级（跨方法）统计使用的方法通配符。
pub const ANY_METHOD: &str = "*";
