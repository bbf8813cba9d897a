use crate::{command::Command, context::DispatchContext};
use async_trait::async_trait;

/// 命令处理器
///
/// 处理器按调用实例化（作用域提供或零参工厂构造），执行体内的任何失败
/// 以 `anyhow::Error` 上抛，由管线按“后钩子 → 异常过滤器”的次序裁决。
#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, ctx: &DispatchContext, cmd: C) -> anyhow::Result<C::Output>;
}
