use crate::command::Command;
use crate::descriptor::{BoxAnySend, BoxHandler, ConstructFn, HandlerDescriptor, InvokeFn};
use crate::error::DispatchError;
use crate::filter::Filter;
use crate::handler::CommandHandler;
use dashmap::DashMap;
use dispatch_completion::Fault;
use std::any::{TypeId, type_name};
use std::sync::Arc;

/// 类型注册表（协作者）
///
/// 命令类型到处理器描述符的查找来源；引擎只依赖该契约，
/// 不关心描述符如何被发现或装配。
pub trait TypeRegistry: Send + Sync {
    fn lookup(&self, command_type: TypeId) -> Option<Arc<HandlerDescriptor>>;
    fn enumerate(&self) -> Vec<Arc<HandlerDescriptor>>;
}

/// 依赖作用域（协作者）：每次调用的服务解析
///
/// 只在激活的第一步被询问；返回 `Ok(None)` 表示交由零参工厂构造。
pub trait DependencyScope: Send + Sync {
    fn resolve(&self, handler_type: TypeId) -> anyhow::Result<Option<BoxHandler>>;
}

/// 作用域提供者：每次分发开启一个作用域，随调用结束释放
pub trait ScopeProvider: Send + Sync {
    fn begin_scope(&self) -> Box<dyn DependencyScope>;
}

/// 过滤器提供者（协作者）
///
/// 对同一描述符须给出跨调用稳定的有序列表。
pub trait FilterProvider: Send + Sync {
    fn filters_for(&self, descriptor: &HandlerDescriptor) -> Vec<Arc<dyn Filter>>;
}

/// 空作用域：不提供任何实例
#[derive(Clone, Copy, Debug, Default)]
pub struct NullScope;

impl DependencyScope for NullScope {
    fn resolve(&self, _handler_type: TypeId) -> anyhow::Result<Option<BoxHandler>> {
        Ok(None)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullScopeProvider;

impl ScopeProvider for NullScopeProvider {
    fn begin_scope(&self) -> Box<dyn DependencyScope> {
        Box::new(NullScope)
    }
}

/// 固定列表过滤器提供者：对所有命令返回同一有序列表
#[derive(Default)]
pub struct StaticFilterProvider {
    filters: Vec<Arc<dyn Filter>>,
}

impl StaticFilterProvider {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }
}

impl FilterProvider for StaticFilterProvider {
    fn filters_for(&self, _descriptor: &HandlerDescriptor) -> Vec<Arc<dyn Filter>> {
        self.filters.clone()
    }
}

/// 基于内存的 TypeRegistry 实现
/// - 通过 TypeId 注册不同 Command 对应的处理器描述符
/// - 运行时以类型擦除（Any）方式进行调度
pub struct InMemoryTypeRegistry {
    descriptors: DashMap<TypeId, Arc<HandlerDescriptor>>,
}

impl Default for InMemoryTypeRegistry {
    fn default() -> Self {
        Self {
            descriptors: DashMap::new(),
        }
    }
}

impl InMemoryTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理器类型（零参构造取 `Default`）
    pub fn register<C, H>(&self) -> Result<(), DispatchError>
    where
        C: Command,
        H: CommandHandler<C> + Default + 'static,
    {
        self.register_with_factory::<C, H, _>(|| Ok(H::default()))
    }

    /// 以自定义工厂注册
    ///
    /// 工厂必须无副作用；构造失败以激活错误面向调用方。
    pub fn register_with_factory<C, H, F>(&self, factory: F) -> Result<(), DispatchError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
        F: Fn() -> anyhow::Result<H> + Send + Sync + 'static,
    {
        let key = TypeId::of::<C>();
        if self.descriptors.contains_key(&key) {
            return Err(DispatchError::AlreadyRegistered { command: C::NAME });
        }

        let construct: ConstructFn = Arc::new(move || factory().map(|h| Box::new(h) as BoxHandler));

        let invoke: InvokeFn = Arc::new(move |handler, ctx, boxed_cmd| {
            Box::pin(async move {
                let handler = match handler.downcast::<H>() {
                    Ok(h) => h,
                    Err(_) => {
                        return Err(Fault::new(DispatchError::TypeMismatch {
                            expected: type_name::<H>(),
                            found: "unknown",
                        }));
                    }
                };
                // 正常情况下这里的 downcast 永远不会失败（键与闭包同一泛型 C）
                let cmd = match boxed_cmd.downcast::<C>() {
                    Ok(c) => c,
                    Err(_) => {
                        return Err(Fault::new(DispatchError::TypeMismatch {
                            expected: type_name::<C>(),
                            found: "unknown",
                        }));
                    }
                };
                match handler.handle(ctx.as_ref(), *cmd).await {
                    Ok(output) => Ok(Box::new(output) as BoxAnySend),
                    Err(cause) => Err(Fault::new(cause)),
                }
            })
        });

        let descriptor = Arc::new(HandlerDescriptor::new(
            C::NAME,
            TypeId::of::<C>(),
            type_name::<H>(),
            TypeId::of::<H>(),
            construct,
            invoke,
        ));
        self.descriptors.insert(key, descriptor);

        Ok(())
    }

    /// 已注册的命令名列表（只读视图）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        self.descriptors
            .iter()
            .map(|entry| entry.value().command_name())
            .collect()
    }
}

impl TypeRegistry for InMemoryTypeRegistry {
    fn lookup(&self, command_type: TypeId) -> Option<Arc<HandlerDescriptor>> {
        self.descriptors
            .get(&command_type)
            .map(|entry| entry.value().clone())
    }

    fn enumerate(&self) -> Vec<Arc<HandlerDescriptor>> {
        self.descriptors
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
