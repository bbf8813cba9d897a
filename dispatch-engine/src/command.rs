/// 命令（Command）
///
/// 表达“意图”的请求对象，由分发器路由到唯一注册的处理器。
/// - 对分发器而言不可变：创建于调用方，调用返回即销毁；
/// - 以具体类型标识，同一命令类型恰有一个处理器；
/// - 建议保持语义化的“动宾结构”命名，如 `CreateUser`、`CloseOrder`。
///
/// 关联项：
/// - `NAME`：命令的稳定名称，用于日志、错误与路由。避免依赖 `type_name::<T>()`。
/// - `Output`：处理器成功时交回调用方的结果类型。
pub trait Command: Send + Sync + 'static {
    /// 命令的稳定名称（建议常量字符串，不随重构变化）
    const NAME: &'static str;

    /// 命令执行结果类型
    type Output: Send + 'static;
}
