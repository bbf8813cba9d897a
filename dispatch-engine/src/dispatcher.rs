use crate::activator::HandlerActivator;
use crate::command::Command;
use crate::context::{CallMetadata, DispatchContext};
use crate::descriptor::BoxAnySend;
use crate::error::DispatchError;
use crate::pipeline::{HandlerInvoke, PipelineContext, run_exception_filters, run_filters};
use crate::registry::{
    FilterProvider, NullScopeProvider, ScopeProvider, StaticFilterProvider, TypeRegistry,
};
use bon::Builder;
use dispatch_completion::{CancellationToken, Completion, Outcome};
use std::any::{TypeId, type_name};
use std::sync::Arc;
use tracing::{debug, error};

/// 门面自身在故障标记集中使用的记录方名义
const DISPATCH_LOGGER: &str = "dispatch-engine";

/// 分发门面
///
/// 串起整条控制流：查描述符 → 开作用域 → 激活处理器 → 驱动过滤器链
/// 与异常阶段 → 提取类型化结果。跨调用的可变状态仅有激活器的两级
/// 创建策略缓存；每次调用的管线上下文独占不共享。
#[derive(Builder)]
pub struct Dispatcher {
    registry: Arc<dyn TypeRegistry>,
    #[builder(default = Arc::new(StaticFilterProvider::default()))]
    filters: Arc<dyn FilterProvider>,
    #[builder(default = Arc::new(NullScopeProvider))]
    scopes: Arc<dyn ScopeProvider>,
    #[builder(skip)]
    activator: HandlerActivator,
}

impl Dispatcher {
    /// 分发命令（无取消信号）
    pub async fn process<C: Command>(
        &self,
        meta: CallMetadata,
        cmd: C,
    ) -> Result<C::Output, DispatchError> {
        self.process_with_token(meta, cmd, CancellationToken::new())
            .await
    }

    /// 分发命令，携带协作式取消信号
    ///
    /// 取消只在步骤边界被观察：门面入口一次、处理器启动前一次；
    /// 已在执行的工作不会被打断。
    pub async fn process_with_token<C: Command>(
        &self,
        meta: CallMetadata,
        cmd: C,
        token: CancellationToken,
    ) -> Result<C::Output, DispatchError> {
        let Some(descriptor) = self.registry.lookup(TypeId::of::<C>()) else {
            return Err(DispatchError::HandlerNotFound(C::NAME));
        };

        // 每次调用开启一个依赖作用域；上下文析构时随之释放，
        // 成功、故障与取消路径一视同仁
        let scope = self.scopes.begin_scope();
        let ctx = Arc::new(DispatchContext::new(C::NAME, meta, token, scope));

        debug!(dispatch_id = %ctx.dispatch_id(), command = C::NAME, "dispatching");

        if ctx.token().is_cancelled() {
            return Err(DispatchError::Canceled(C::NAME));
        }

        let handler = self.activator.create(&ctx, &descriptor)?;
        let filters = self.filters.filters_for(&descriptor);
        let mut pipeline = PipelineContext::new(ctx.clone(), descriptor.handler_name());

        let invoke: HandlerInvoke = {
            let fut = (descriptor.invoke_fn())(handler, ctx.clone(), Box::new(cmd) as BoxAnySend);
            let token = ctx.token().clone();
            let completion = Completion::from_future(async move {
                if token.is_cancelled() {
                    return Outcome::Canceled;
                }
                match fut.await {
                    Ok(value) => Outcome::Completed(value),
                    Err(fault) => Outcome::Faulted(fault),
                }
            });
            Box::pin(completion.outcome())
        };

        let chain = run_filters(&filters, &mut pipeline, invoke).await?;
        let outcome = match chain {
            Outcome::Faulted(fault) => {
                run_exception_filters(&filters, &mut pipeline, fault).await?
            }
            other => other,
        };

        match outcome {
            Outcome::Completed(_) => Self::extract::<C>(&mut pipeline),
            Outcome::Canceled => Err(DispatchError::Canceled(C::NAME)),
            Outcome::Faulted(fault) => {
                // 同一故障实例只记录一次；标记随故障对象跨协作方传播
                if fault.try_mark_logged(DISPATCH_LOGGER) {
                    error!(
                        dispatch_id = %ctx.dispatch_id(),
                        command = C::NAME,
                        fault = %fault,
                        "unhandled fault"
                    );
                }
                Err(DispatchError::Handler(fault))
            }
        }
    }

    fn extract<C: Command>(pipeline: &mut PipelineContext) -> Result<C::Output, DispatchError> {
        let Some(value) = pipeline.take_result() else {
            return Err(DispatchError::TypeMismatch {
                expected: type_name::<C::Output>(),
                found: "nothing",
            });
        };
        match value.downcast::<C::Output>() {
            Ok(output) => Ok(*output),
            Err(_) => Err(DispatchError::TypeMismatch {
                expected: type_name::<C::Output>(),
                found: "unknown",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BoxHandler;
    use crate::filter::{ExceptionContext, ExecutingContext, Filter, FilterCapability};
    use crate::handler::CommandHandler;
    use crate::registry::{DependencyScope, InMemoryTypeRegistry};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    struct AddItem {
        quantity: u32,
    }

    impl Command for AddItem {
        const NAME: &'static str = "AddItem";
        type Output = u32;
    }

    #[derive(Default)]
    struct AddItemHandler;

    #[async_trait]
    impl CommandHandler<AddItem> for AddItemHandler {
        async fn handle(&self, _ctx: &DispatchContext, cmd: AddItem) -> anyhow::Result<u32> {
            if cmd.quantity == 0 {
                anyhow::bail!("quantity must be positive");
            }
            Ok(cmd.quantity * 2)
        }
    }

    fn dispatcher_with(registry: InMemoryTypeRegistry) -> Dispatcher {
        Dispatcher::builder().registry(Arc::new(registry)).build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn register_and_process_returns_typed_output() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<AddItem, AddItemHandler>().unwrap();
        let dispatcher = dispatcher_with(registry);

        let out = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 3 })
            .await
            .unwrap();
        assert_eq!(out, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unregistered_command_is_handler_not_found() {
        let dispatcher = dispatcher_with(InMemoryTypeRegistry::new());
        let err = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 1 })
            .await
            .unwrap_err();
        match err {
            DispatchError::HandlerNotFound(name) => assert_eq!(name, "AddItem"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handler_fault_re_raised_when_no_filter_absorbs() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<AddItem, AddItemHandler>().unwrap();
        let dispatcher = dispatcher_with(registry);

        let err = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 0 })
            .await
            .unwrap_err();
        match err {
            DispatchError::Handler(fault) => {
                assert_eq!(fault.to_string(), "quantity must be positive");
                // 门面已按自己的名义标记记录
                assert!(!fault.try_mark_logged(DISPATCH_LOGGER));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pre_cancelled_token_short_circuits_before_handler() {
        let registry = InMemoryTypeRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        {
            let constructed = constructed.clone();
            registry
                .register_with_factory::<AddItem, AddItemHandler, _>(move || {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok(AddItemHandler)
                })
                .unwrap();
        }
        let dispatcher = dispatcher_with(registry);

        let token = CancellationToken::new();
        token.cancel();
        let err = dispatcher
            .process_with_token(CallMetadata::default(), AddItem { quantity: 1 }, token)
            .await
            .unwrap_err();
        match err {
            DispatchError::Canceled(name) => assert_eq!(name, "AddItem"),
            other => panic!("unexpected error: {other:?}"),
        }
        // 门面入口即短路：处理器从未被构造
        assert_eq!(constructed.load(Ordering::SeqCst), 0);
    }

    /// 为指定处理器类型供给现成实例的侦察作用域
    struct SpyScopeProvider {
        resolved: Arc<AtomicUsize>,
    }

    struct SpyScope {
        resolved: Arc<AtomicUsize>,
    }

    impl ScopeProvider for SpyScopeProvider {
        fn begin_scope(&self) -> Box<dyn DependencyScope> {
            Box::new(SpyScope {
                resolved: self.resolved.clone(),
            })
        }
    }

    impl DependencyScope for SpyScope {
        fn resolve(&self, handler_type: TypeId) -> anyhow::Result<Option<BoxHandler>> {
            if handler_type == TypeId::of::<AddItemHandler>() {
                self.resolved.fetch_add(1, Ordering::SeqCst);
                return Ok(Some(Box::new(AddItemHandler)));
            }
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scope_provided_instance_bypasses_factory() {
        let registry = InMemoryTypeRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        {
            let constructed = constructed.clone();
            registry
                .register_with_factory::<AddItem, AddItemHandler, _>(move || {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok(AddItemHandler)
                })
                .unwrap();
        }
        let resolved = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder()
            .registry(Arc::new(registry))
            .scopes(Arc::new(SpyScopeProvider {
                resolved: resolved.clone(),
            }))
            .build();

        let out = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 2 })
            .await
            .unwrap();
        assert_eq!(out, 4);
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
        // 作用域路径从不走工厂
        assert_eq!(constructed.load(Ordering::SeqCst), 0);
    }

    /// 以异常钩子兜底的过滤器
    struct FallbackFilter {
        fallback: u32,
        absorbed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Filter for FallbackFilter {
        fn name(&self) -> &'static str {
            "fallback"
        }

        fn capability(&self) -> FilterCapability {
            FilterCapability::Exception
        }

        async fn on_exception(&self, cx: &mut ExceptionContext<'_>) {
            self.absorbed.fetch_add(1, Ordering::SeqCst);
            cx.set_result(self.fallback);
            cx.mark_handled();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exception_filter_fallback_value_is_returned() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<AddItem, AddItemHandler>().unwrap();
        let absorbed = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder()
            .registry(Arc::new(registry))
            .filters(Arc::new(StaticFilterProvider::new(vec![Arc::new(
                FallbackFilter {
                    fallback: 42,
                    absorbed: absorbed.clone(),
                },
            )])))
            .build();

        let out = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 0 })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(absorbed.load(Ordering::SeqCst), 1);
    }

    /// 前钩子短路的过滤器
    struct CachedResultFilter;

    #[async_trait]
    impl Filter for CachedResultFilter {
        fn name(&self) -> &'static str {
            "cached-result"
        }

        fn capability(&self) -> FilterCapability {
            FilterCapability::Command
        }

        async fn on_executing(&self, cx: &mut ExecutingContext<'_>) {
            cx.set_result(1000u32);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_circuit_result_skips_handler_entirely() {
        let registry = InMemoryTypeRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        {
            let constructed = constructed.clone();
            registry
                .register_with_factory::<AddItem, AddItemHandler, _>(move || {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok(AddItemHandler)
                })
                .unwrap();
        }
        let dispatcher = Dispatcher::builder()
            .registry(Arc::new(registry))
            .filters(Arc::new(StaticFilterProvider::new(vec![Arc::new(
                CachedResultFilter,
            )])))
            .build();

        let out = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 5 })
            .await
            .unwrap();
        assert_eq!(out, 1000);
        // 处理器实例仍会被激活（短路发生在管线内），但其执行体未运行：
        // 结果来自过滤器而非 quantity * 2
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_is_safe() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<AddItem, AddItemHandler>().unwrap();
        let dispatcher = Arc::new(dispatcher_with(registry));

        let mut set = JoinSet::new();
        for i in 1..=100u32 {
            let dispatcher = dispatcher.clone();
            set.spawn(async move {
                dispatcher
                    .process(CallMetadata::default(), AddItem { quantity: i })
                    .await
                    .unwrap()
            });
        }
        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap());
        }
        results.sort_unstable();
        assert_eq!(results.len(), 100);
        assert_eq!(results[0], 2);
        assert_eq!(results[99], 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn metadata_travels_with_the_call() {
        struct Echo;

        impl Command for Echo {
            const NAME: &'static str = "Echo";
            type Output = String;
        }

        #[derive(Default)]
        struct EchoHandler;

        #[async_trait]
        impl CommandHandler<Echo> for EchoHandler {
            async fn handle(&self, ctx: &DispatchContext, _cmd: Echo) -> anyhow::Result<String> {
                Ok(ctx.meta().correlation_id().unwrap_or("none").to_string())
            }
        }

        let registry = InMemoryTypeRegistry::new();
        registry.register::<Echo, EchoHandler>().unwrap();
        let dispatcher = dispatcher_with(registry);

        let meta = CallMetadata::builder()
            .maybe_correlation_id(Some("cor-7".into()))
            .build();
        let out = dispatcher.process(meta, Echo).await.unwrap();
        assert_eq!(out, "cor-7");
    }

    /// 记录析构次序的作用域：验证所有退出路径都会释放
    struct TrackedScopeProvider {
        released: Arc<Mutex<Vec<&'static str>>>,
    }

    struct TrackedScope {
        released: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ScopeProvider for TrackedScopeProvider {
        fn begin_scope(&self) -> Box<dyn DependencyScope> {
            Box::new(TrackedScope {
                released: self.released.clone(),
            })
        }
    }

    impl DependencyScope for TrackedScope {
        fn resolve(&self, _handler_type: TypeId) -> anyhow::Result<Option<BoxHandler>> {
            Ok(None)
        }
    }

    impl Drop for TrackedScope {
        fn drop(&mut self) {
            self.released.lock().unwrap().push("released");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scope_released_on_fault_path_too() {
        let registry = InMemoryTypeRegistry::new();
        registry.register::<AddItem, AddItemHandler>().unwrap();
        let released = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::builder()
            .registry(Arc::new(registry))
            .scopes(Arc::new(TrackedScopeProvider {
                released: released.clone(),
            }))
            .build();

        let _ = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 0 })
            .await
            .unwrap_err();
        assert_eq!(*released.lock().unwrap(), vec!["released"]);

        let _ = dispatcher
            .process(CallMetadata::default(), AddItem { quantity: 1 })
            .await
            .unwrap();
        assert_eq!(*released.lock().unwrap(), vec!["released", "released"]);
    }
}
