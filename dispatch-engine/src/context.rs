use crate::registry::DependencyScope;
use bon::Builder;
use dispatch_completion::CancellationToken;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 调用元数据
///
/// 承载一次分发所需的横切信息（链路追踪、审计主体、操作因果），
/// 由调用方按需填充，引擎只透传不解释。
#[derive(Builder, Default, Debug, Clone, Serialize, Deserialize)]
pub struct CallMetadata {
    /// 关联ID
    correlation_id: Option<String>,
    /// 因果ID
    causation_id: Option<String>,
    /// 触发命令的主体类型（如用户、系统等）
    actor_type: Option<String>,
    /// 触发命令的主体ID
    actor_id: Option<String>,
}

impl CallMetadata {
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}

/// 分发上下文
///
/// 每次分发独占一个实例，聚合本次调用的全部外部资源：
/// - 调用元数据与分发ID（日志定位）；
/// - 协作式取消信号；
/// - 依赖作用域：随上下文创建而开启，随上下文析构而释放，
///   所有退出路径（成功、故障、取消）一视同仁。
pub struct DispatchContext {
    dispatch_id: Uuid,
    command_name: &'static str,
    meta: CallMetadata,
    token: CancellationToken,
    scope: Box<dyn DependencyScope>,
}

impl DispatchContext {
    pub(crate) fn new(
        command_name: &'static str,
        meta: CallMetadata,
        token: CancellationToken,
        scope: Box<dyn DependencyScope>,
    ) -> Self {
        Self {
            dispatch_id: Uuid::new_v4(),
            command_name,
            meta,
            token,
            scope,
        }
    }

    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }

    pub fn command_name(&self) -> &'static str {
        self.command_name
    }

    pub fn meta(&self) -> &CallMetadata {
        &self.meta
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn scope(&self) -> &dyn DependencyScope {
        self.scope.as_ref()
    }
}
