use async_trait::async_trait;
use dispatch_engine::{
    CallMetadata, Command, CommandHandler, DispatchContext, DispatchError, Dispatcher,
    ExceptionContext, ExecutingContext, Filter, FilterCapability, InMemoryTypeRegistry,
    StaticFilterProvider,
};
use std::sync::Arc;

struct CreateUser {
    name: String,
}

impl Command for CreateUser {
    const NAME: &'static str = "CreateUser";
    type Output = String;
}

#[derive(Default)]
struct CreateUserHandler;

#[async_trait]
impl CommandHandler<CreateUser> for CreateUserHandler {
    async fn handle(&self, _ctx: &DispatchContext, cmd: CreateUser) -> anyhow::Result<String> {
        if cmd.name.is_empty() {
            anyhow::bail!("name must not be empty");
        }
        Ok(format!("user:{}", cmd.name))
    }
}

struct TraceFilter;

#[async_trait]
impl Filter for TraceFilter {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn capability(&self) -> FilterCapability {
        FilterCapability::Command
    }

    async fn on_executing(&self, cx: &mut ExecutingContext<'_>) {
        println!(
            "-> {} (dispatch {})",
            cx.pipeline().command_name(),
            cx.pipeline().call().dispatch_id()
        );
    }
}

/// 处理器失败时兜底返回占位用户
struct FallbackUserFilter;

#[async_trait]
impl Filter for FallbackUserFilter {
    fn name(&self) -> &'static str {
        "fallback-user"
    }

    fn capability(&self) -> FilterCapability {
        FilterCapability::Exception
    }

    async fn on_exception(&self, cx: &mut ExceptionContext<'_>) {
        eprintln!("absorbing fault: {}", cx.fault());
        cx.set_result("user:anonymous".to_string());
        cx.mark_handled();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let registry = InMemoryTypeRegistry::new();
    registry.register::<CreateUser, CreateUserHandler>()?;

    let dispatcher = Dispatcher::builder()
        .registry(Arc::new(registry))
        .filters(Arc::new(StaticFilterProvider::new(vec![
            Arc::new(TraceFilter),
            Arc::new(FallbackUserFilter),
        ])))
        .build();

    let meta = CallMetadata::builder()
        .maybe_correlation_id(Some("cor-1".into()))
        .maybe_actor_type(Some("user".into()))
        .maybe_actor_id(Some("u-1".into()))
        .build();

    let created = dispatcher
        .process(
            meta.clone(),
            CreateUser {
                name: "Alice".into(),
            },
        )
        .await?;
    println!("created: {created}");

    // 处理器失败 -> 异常过滤器兜底
    let fallback = dispatcher
        .process(meta.clone(), CreateUser { name: "".into() })
        .await?;
    println!("fallback: {fallback}");

    // 未注册的命令 -> 返回 HandlerNotFound 错误
    struct DeleteUser;

    impl Command for DeleteUser {
        const NAME: &'static str = "DeleteUser";
        type Output = ();
    }

    if let Err(DispatchError::HandlerNotFound(name)) =
        dispatcher.process(meta, DeleteUser).await
    {
        eprintln!("HandlerNotFound as expected for command: {name}");
    }

    Ok(())
}
