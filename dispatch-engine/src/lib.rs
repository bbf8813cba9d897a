//! 命令分发引擎（dispatch-engine）
//!
//! 将类型化命令路由到唯一注册的处理器，并在调用外侧包裹一条有序、
//! 可短路的横切过滤器链：
//! - 命令与处理器契约（`command`/`handler`）
//! - 描述符与两级创建策略缓存（`descriptor`/`activator`）
//! - 过滤器能力模型与管线引擎（`filter`/`pipeline`）
//! - 分发门面（`dispatcher`）：校验、作用域、驱动管线并提取结果
//! - 协作者接口与内存实现（`registry`）
//!
//! 完成语义（成功/故障/取消的统一表达）由 `dispatch-completion` 提供；
//! 本 crate 只编排“谁来处理、按什么次序、故障归谁吸收”。
//!
pub mod activator;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler;
pub mod pipeline;
pub mod registry;

pub use activator::{HandlerActivator, HandlerFactory};
pub use command::Command;
pub use context::{CallMetadata, DispatchContext};
pub use descriptor::{BoxAnySend, BoxHandler, HandlerDescriptor, PropertyKey};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use filter::{
    ExceptionContext, ExecutedContext, ExecutingContext, Filter, FilterCapability,
};
pub use handler::CommandHandler;
pub use pipeline::PipelineContext;
pub use registry::{
    DependencyScope, FilterProvider, InMemoryTypeRegistry, NullScope, NullScopeProvider,
    ScopeProvider, StaticFilterProvider, TypeRegistry,
};
