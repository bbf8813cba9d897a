use crate::descriptor::BoxAnySend;
use crate::pipeline::PipelineContext;
use async_trait::async_trait;
use dispatch_completion::Fault;
use std::any::Any;

/// 过滤器能力声明
///
/// 过滤器声明自己实现了哪些钩子，引擎只调用声明过的钩子：
/// - `Command`：命令执行前/后钩子（pre/post）；
/// - `Exception`：异常钩子，仅当故障逃出过滤器链后进入；
/// - `All`：两类钩子都实现。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterCapability {
    Command,
    Exception,
    All,
}

impl FilterCapability {
    pub fn has_command(self) -> bool {
        matches!(self, Self::Command | Self::All)
    }

    pub fn has_exception(self) -> bool {
        matches!(self, Self::Exception | Self::All)
    }
}

/// 横切过滤器
///
/// 次序语义（“洋葱”组合）：
/// - 前钩子按声明次序执行；
/// - 后钩子与异常钩子按声明次序的**逆序**执行——最后声明者包在最内层，
///   最先看到故障，有机会在外层被问到之前吸收它；
/// - 前钩子设置结果即短路：内层过滤器与处理器不再执行，
///   本过滤器的后钩子照常配对执行。
#[async_trait]
pub trait Filter: Send + Sync {
    /// 过滤器稳定名称（日志与一致性错误定位）
    fn name(&self) -> &'static str;

    /// 声明实现的钩子能力
    fn capability(&self) -> FilterCapability;

    /// 命令执行前钩子
    async fn on_executing(&self, cx: &mut ExecutingContext<'_>) {
        let _ = cx;
    }

    /// 命令执行后钩子（成功、故障或取消都会到达）
    async fn on_executed(&self, cx: &mut ExecutedContext<'_>) {
        let _ = cx;
    }

    /// 异常钩子
    async fn on_exception(&self, cx: &mut ExceptionContext<'_>) {
        let _ = cx;
    }
}

/// 执行前视图
///
/// 设置结果即宣告短路；对共享管线上下文的其余改动（如压入作用域资源）
/// 由过滤器自行与后钩子配对。
pub struct ExecutingContext<'a> {
    pipeline: &'a mut PipelineContext,
}

impl<'a> ExecutingContext<'a> {
    pub(crate) fn new(pipeline: &'a mut PipelineContext) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &PipelineContext {
        self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PipelineContext {
        self.pipeline
    }

    /// 直接给出结果，短路内层过滤器与处理器
    pub fn set_result<T: Any + Send>(&mut self, value: T) {
        self.pipeline.set_result(Box::new(value) as BoxAnySend);
    }

    pub fn has_result(&self) -> bool {
        self.pipeline.has_result()
    }
}

/// 执行后视图
///
/// 携带内层的终态：成功、故障或取消。故障时过滤器可 `mark_handled`
/// 并补一个替代结果；取消不是故障，除非过滤器主动观察，否则不参与裁决。
pub struct ExecutedContext<'a> {
    pipeline: &'a mut PipelineContext,
    fault: Option<Fault>,
    canceled: bool,
    handled: bool,
}

impl<'a> ExecutedContext<'a> {
    pub(crate) fn succeeded(pipeline: &'a mut PipelineContext) -> Self {
        Self {
            pipeline,
            fault: None,
            canceled: false,
            handled: false,
        }
    }

    pub(crate) fn faulted(pipeline: &'a mut PipelineContext, fault: Fault) -> Self {
        Self {
            pipeline,
            fault: Some(fault),
            canceled: false,
            handled: false,
        }
    }

    pub(crate) fn canceled(pipeline: &'a mut PipelineContext) -> Self {
        Self {
            pipeline,
            fault: None,
            canceled: true,
            handled: false,
        }
    }

    pub(crate) fn into_fault_state(self) -> (Option<Fault>, bool) {
        (self.fault, self.handled)
    }

    pub fn pipeline(&self) -> &PipelineContext {
        self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PipelineContext {
        self.pipeline
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn is_succeeded(&self) -> bool {
        self.fault.is_none() && !self.canceled
    }

    /// 宣告故障已被本过滤器吸收；须同时给出替代结果
    pub fn mark_handled(&mut self) {
        if self.fault.is_some() {
            self.handled = true;
        }
    }

    /// 设置（或替换）结果值
    pub fn set_result<T: Any + Send>(&mut self, value: T) {
        self.pipeline.set_result(Box::new(value) as BoxAnySend);
    }
}

/// 异常视图
///
/// 仅当故障逃出过滤器链后，异常能力的过滤器按逆序收到此视图。
pub struct ExceptionContext<'a> {
    pipeline: &'a mut PipelineContext,
    fault: &'a Fault,
    handled: bool,
}

impl<'a> ExceptionContext<'a> {
    pub(crate) fn new(pipeline: &'a mut PipelineContext, fault: &'a Fault) -> Self {
        Self {
            pipeline,
            fault,
            handled: false,
        }
    }

    pub(crate) fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn pipeline(&self) -> &PipelineContext {
        self.pipeline
    }

    pub fn fault(&self) -> &Fault {
        self.fault
    }

    /// 宣告故障已被吸收；须同时给出替代结果
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// 设置替代结果
    pub fn set_result<T: Any + Send>(&mut self, value: T) {
        self.pipeline.set_result(Box::new(value) as BoxAnySend);
    }
}
