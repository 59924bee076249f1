//! # spark-rpc-local
//!
//! ## 定位与职责（Why）
//! - 实现进程内（`injvm`）协议：服务实现与调用方位于同一进程时，调用直接经导出表分发，
//!   不经过任何传输层；
//! - 导出表 [`ExporterRegistry`] 由服务端导出生命周期写入，由 [`LocalInvoker`] 在每次调用时读取。
//!
//! ## 架构嵌入（Where）
//! - 依赖 `spark-rpc` 的 [`spark_rpc::Invoker`] 与 [`spark_rpc::FilterRegistry`]：导出时装配服务端链路，
//!   引用时装配消费端链路，准入控制等横切逻辑因此对本地调用同样生效。
//!
//! ## 取舍（Trade-offs）
//! - 本地调用共享调用对象而非序列化副本，服务实现看到的参数与调用方构造的完全一致。

mod exporter;
mod invoker;
mod protocol;

pub use exporter::{Exporter, ExporterRegistry};
pub use invoker::{LOCAL_ADDRESS, LocalInvoker};
pub use protocol::LocalProtocol;
