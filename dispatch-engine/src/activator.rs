use crate::context::DispatchContext;
use crate::descriptor::{BoxHandler, HandlerDescriptor, PropertyKey};
use crate::error::DispatchError;
use dispatch_completion::Fault;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// 创建策略：零参工厂，按描述符缓存复用
pub type HandlerFactory = Arc<dyn Fn() -> Result<BoxHandler, DispatchError> + Send + Sync>;

struct FastSlot {
    descriptor: Arc<HandlerDescriptor>,
    factory: HandlerFactory,
}

/// 处理器激活器
///
/// 解析“如何得到一个处理器实例”并缓存该策略，两级设计压低竞争：
/// - 一级（单槽快缓存）：至多存一个（描述符，工厂）对。首次使用以一次
///   原子写占位，并发首调互不阻塞，竞争失败方静默丢弃自己构建的工厂
///   （工厂构建无副作用）；此后描述符引用相等即零查表命中。
/// - 二级（描述符旁路表）：一级不匹配时，在该描述符自带的扩展属性表中
///   按本激活器的不透明键幂等读写，每个描述符恰好收敛到一个工厂。
///
/// 一个分发器主要服务单一命令类型时，一级缓存覆盖全部调用；
/// 面对多描述符的分发器由二级兜底。
pub struct HandlerActivator {
    fast_slot: OnceLock<FastSlot>,
    side_table_key: PropertyKey,
}

impl HandlerActivator {
    pub fn new() -> Self {
        Self {
            fast_slot: OnceLock::new(),
            side_table_key: PropertyKey::next(),
        }
    }

    /// 解析一个处理器实例
    ///
    /// 作用域内已有实例则直接使用（作用域实例可能是每调用生命周期，
    /// 永不缓存）；否则取缓存的零参工厂现场构造。构造与作用域查找的
    /// 失败都以激活错误包装，保留原始原因。
    pub fn create(
        &self,
        ctx: &DispatchContext,
        descriptor: &Arc<HandlerDescriptor>,
    ) -> Result<BoxHandler, DispatchError> {
        match ctx.scope().resolve(descriptor.handler_type()) {
            Ok(Some(instance)) => return Ok(instance),
            Ok(None) => {}
            Err(cause) => {
                return Err(DispatchError::Activation {
                    handler: descriptor.handler_name(),
                    source: Fault::new(cause),
                });
            }
        }
        (self.factory_for(descriptor))()
    }

    fn factory_for(&self, descriptor: &Arc<HandlerDescriptor>) -> HandlerFactory {
        if self.fast_slot.get().is_none() {
            let candidate = FastSlot {
                descriptor: descriptor.clone(),
                factory: Self::build_factory(descriptor),
            };
            // 竞争失败方的工厂在此静默丢弃
            let _ = self.fast_slot.set(candidate);
        }
        if let Some(slot) = self.fast_slot.get() {
            if Arc::ptr_eq(&slot.descriptor, descriptor) {
                return slot.factory.clone();
            }
        }

        debug!(
            handler = descriptor.handler_name(),
            "fast slot missed, falling back to descriptor side table"
        );
        let build = {
            let descriptor = descriptor.clone();
            move || Self::build_factory(&descriptor)
        };
        descriptor
            .properties()
            .get_or_insert_with(self.side_table_key, build)
    }

    fn build_factory(descriptor: &Arc<HandlerDescriptor>) -> HandlerFactory {
        let construct = descriptor.construct_fn();
        let handler = descriptor.handler_name();
        Arc::new(move || {
            construct().map_err(|cause| DispatchError::Activation {
                handler,
                source: Fault::new(cause),
            })
        })
    }
}

impl Default for HandlerActivator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::context::CallMetadata;
    use crate::handler::CommandHandler;
    use crate::registry::{InMemoryTypeRegistry, NullScope, TypeRegistry};
    use async_trait::async_trait;
    use dispatch_completion::CancellationToken;
    use std::any::TypeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    struct Ping;

    impl Command for Ping {
        const NAME: &'static str = "Ping";
        type Output = u32;
    }

    #[derive(Default)]
    struct PingHandler;

    #[async_trait]
    impl CommandHandler<Ping> for PingHandler {
        async fn handle(&self, _ctx: &DispatchContext, _cmd: Ping) -> anyhow::Result<u32> {
            Ok(1)
        }
    }

    struct Pong;

    impl Command for Pong {
        const NAME: &'static str = "Pong";
        type Output = u32;
    }

    #[derive(Default)]
    struct PongHandler;

    #[async_trait]
    impl CommandHandler<Pong> for PongHandler {
        async fn handle(&self, _ctx: &DispatchContext, _cmd: Pong) -> anyhow::Result<u32> {
            Ok(2)
        }
    }

    fn ctx() -> DispatchContext {
        DispatchContext::new(
            "test",
            CallMetadata::default(),
            CancellationToken::new(),
            Box::new(NullScope),
        )
    }

    fn descriptor_for<C: Command>(registry: &InMemoryTypeRegistry) -> Arc<HandlerDescriptor> {
        registry.lookup(TypeId::of::<C>()).unwrap()
    }

    #[test]
    fn repeated_creates_for_one_descriptor_stay_in_fast_slot() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<Ping, PingHandler>().unwrap();
        let descriptor = descriptor_for::<Ping>(&registry);

        let activator = HandlerActivator::new();
        let ctx = ctx();
        for _ in 0..10 {
            activator.create(&ctx, &descriptor).unwrap();
        }
        // 一级缓存全程命中：旁路表从未被触碰
        assert!(descriptor.properties().is_empty());
    }

    #[test]
    fn second_descriptor_falls_back_to_side_table_once() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<Ping, PingHandler>().unwrap();
        registry.register::<Pong, PongHandler>().unwrap();
        let ping = descriptor_for::<Ping>(&registry);
        let pong = descriptor_for::<Pong>(&registry);

        let activator = HandlerActivator::new();
        let ctx = ctx();
        activator.create(&ctx, &ping).unwrap();
        for _ in 0..5 {
            activator.create(&ctx, &pong).unwrap();
        }

        assert!(ping.properties().is_empty());
        // 旁路表对每个描述符只收敛到一个工厂
        assert_eq!(pong.properties().len(), 1);
    }

    #[test]
    fn construction_counts_once_per_create() {
        let registry = InMemoryTypeRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        {
            let constructed = constructed.clone();
            registry
                .register_with_factory::<Ping, PingHandler, _>(move || {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok(PingHandler)
                })
                .unwrap();
        }
        let descriptor = descriptor_for::<Ping>(&registry);

        let activator = HandlerActivator::new();
        let ctx = ctx();
        for _ in 0..3 {
            activator.create(&ctx, &descriptor).unwrap();
        }
        assert_eq!(constructed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_creates_converge_and_instantiate_once_per_call() {
        let registry = Arc::new(InMemoryTypeRegistry::new());
        let constructed = Arc::new(AtomicUsize::new(0));
        {
            let constructed = constructed.clone();
            registry
                .register_with_factory::<Ping, PingHandler, _>(move || {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok(PingHandler)
                })
                .unwrap();
        }
        let descriptor = descriptor_for::<Ping>(&registry);
        let activator = Arc::new(HandlerActivator::new());

        let mut set = JoinSet::new();
        for _ in 0..64 {
            let activator = activator.clone();
            let descriptor = descriptor.clone();
            set.spawn(async move {
                let ctx = ctx();
                activator.create(&ctx, &descriptor).map(|_| ())
            });
        }
        while let Some(joined) = set.join_next().await {
            joined.unwrap().unwrap();
        }

        // 每次调用恰好构造一个实例，不多不少
        assert_eq!(constructed.load(Ordering::SeqCst), 64);
        assert!(descriptor.properties().is_empty());
    }

    #[test]
    fn constructor_failure_surfaces_as_activation_error() {
        let registry = InMemoryTypeRegistry::new();
        registry
            .register_with_factory::<Ping, PingHandler, _>(|| Err(anyhow::anyhow!("db down")))
            .unwrap();
        let descriptor = descriptor_for::<Ping>(&registry);

        let activator = HandlerActivator::new();
        let err = activator.create(&ctx(), &descriptor).unwrap_err();
        match err {
            DispatchError::Activation { handler, source } => {
                assert!(handler.contains("PingHandler"));
                assert_eq!(source.to_string(), "db down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
