use crate::context::DispatchContext;
use dashmap::DashMap;
use dispatch_completion::Fault;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 类型擦除后的处理器实例
pub type BoxHandler = Box<dyn Any + Send>;

/// 类型擦除后的命令/结果载体
pub type BoxAnySend = Box<dyn Any + Send>;

/// 处理器调用的返回流
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<BoxAnySend, Fault>> + Send + 'static>>;

/// 处理器调用闭包：消费实例与命令，产出类型擦除的结果
pub type InvokeFn =
    Arc<dyn Fn(BoxHandler, Arc<DispatchContext>, BoxAnySend) -> InvokeFuture + Send + Sync>;

/// 零参构造闭包（构造必须无副作用，允许并发冗余执行后丢弃）
pub type ConstructFn = Arc<dyn Fn() -> anyhow::Result<BoxHandler> + Send + Sync>;

/// 扩展属性键（不透明令牌）
///
/// 进程内唯一；持键方独占该键下的值类型约定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyKey(u64);

impl PropertyKey {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// 扩展属性表
///
/// 描述符随身携带的线程安全旁路缓存：幂等写入，首写者胜出，
/// 后写者静默丢弃自己的冗余产物。
pub struct PropertyBag {
    entries: DashMap<PropertyKey, Box<dyn Any + Send + Sync>>,
}

impl PropertyBag {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 幂等读取或写入
    pub fn get_or_insert_with<V, F>(&self, key: PropertyKey, build: F) -> V
    where
        V: Any + Send + Sync + Clone,
        F: Fn() -> V,
    {
        {
            let entry = self
                .entries
                .entry(key)
                .or_insert_with(|| Box::new(build()));
            if let Some(value) = entry.value().downcast_ref::<V>() {
                return value.clone();
            }
        }
        // 键下类型不符（键被挪作他用）：退化为不缓存
        build()
    }

    /// 读取既有值
    pub fn get<V>(&self, key: PropertyKey) -> Option<V>
    where
        V: Any + Send + Sync + Clone,
    {
        self.entries
            .get(&key)
            .and_then(|entry| entry.value().downcast_ref::<V>().cloned())
    }

    pub fn contains(&self, key: PropertyKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 处理器描述符
///
/// 把命令类型绑定到处理器类型的注册期元数据：
/// - 稳定名称与 `TypeId`（路由、日志与错误定位）；
/// - 类型擦除的零参构造与调用闭包；
/// - 扩展属性表：激活器二级缓存等旁路状态的宿主。
///
/// 每个（命令类型，处理器类型）对只创建一次，以 `Arc` 共享，
/// 身份比较按引用相等（`Arc::ptr_eq`）。
pub struct HandlerDescriptor {
    command_name: &'static str,
    command_type: TypeId,
    handler_name: &'static str,
    handler_type: TypeId,
    construct: ConstructFn,
    invoke: InvokeFn,
    properties: PropertyBag,
}

impl HandlerDescriptor {
    pub fn new(
        command_name: &'static str,
        command_type: TypeId,
        handler_name: &'static str,
        handler_type: TypeId,
        construct: ConstructFn,
        invoke: InvokeFn,
    ) -> Self {
        Self {
            command_name,
            command_type,
            handler_name,
            handler_type,
            construct,
            invoke,
            properties: PropertyBag::new(),
        }
    }

    pub fn command_name(&self) -> &'static str {
        self.command_name
    }

    pub fn command_type(&self) -> TypeId {
        self.command_type
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    pub fn handler_type(&self) -> TypeId {
        self.handler_type
    }

    pub fn construct_fn(&self) -> ConstructFn {
        self.construct.clone()
    }

    pub fn invoke_fn(&self) -> InvokeFn {
        self.invoke.clone()
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("command", &self.command_name)
            .field("handler", &self.handler_name)
            .finish()
    }
}
