use crate::context::DispatchContext;
use crate::descriptor::BoxAnySend;
use crate::error::DispatchError;
use crate::filter::{ExceptionContext, ExecutedContext, ExecutingContext, Filter};
use dispatch_completion::{Fault, Outcome, Unit};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// 终端续延：调用处理器并给出类型擦除的终态
pub type HandlerInvoke = BoxFuture<'static, Outcome<BoxAnySend>>;

/// 管线上下文
///
/// 单次分发独占：携带调用上下文、命令/处理器名称、
/// 在途结果槽与“异常已处理”标记。不跨调用共享。
pub struct PipelineContext {
    call: Arc<DispatchContext>,
    handler_name: &'static str,
    result: Option<BoxAnySend>,
    exception_handled: bool,
}

impl PipelineContext {
    pub(crate) fn new(call: Arc<DispatchContext>, handler_name: &'static str) -> Self {
        Self {
            call,
            handler_name,
            result: None,
            exception_handled: false,
        }
    }

    pub fn call(&self) -> &DispatchContext {
        &self.call
    }

    pub fn command_name(&self) -> &'static str {
        self.call.command_name()
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn exception_handled(&self) -> bool {
        self.exception_handled
    }

    pub(crate) fn set_result(&mut self, value: BoxAnySend) {
        self.result = Some(value);
    }

    pub(crate) fn take_result(&mut self) -> Option<BoxAnySend> {
        self.result.take()
    }

    pub(crate) fn set_exception_handled(&mut self) {
        self.exception_handled = true;
    }
}

fn split_next_command_filter(
    filters: &[Arc<dyn Filter>],
) -> Option<(&Arc<dyn Filter>, &[Arc<dyn Filter>])> {
    let mut rest = filters;
    while let Some((first, tail)) = rest.split_first() {
        if first.capability().has_command() {
            return Some((first, tail));
        }
        rest = tail;
    }
    None
}

/// 运行过滤器链与处理器
///
/// 续延链按声明次序自右向左惰性构建：每层包裹余下的链，先跑前钩子，
/// 设置了结果即短路（内层与处理器不执行，本层后钩子照常配对）；否则
/// 进入内层，捕获其故障后把裁决权交给本层后钩子——标记吸收并补上
/// 替代结果则对外呈现成功，否则故障继续向外传播。取消不是故障，
/// 后钩子照常执行，终态原样外传。
///
/// 返回 `Err` 仅发生在过滤器自身违约（标记吸收却不给结果）。
pub fn run_filters<'a>(
    filters: &'a [Arc<dyn Filter>],
    cx: &'a mut PipelineContext,
    invoke: HandlerInvoke,
) -> BoxFuture<'a, Result<Outcome<Unit>, DispatchError>> {
    Box::pin(async move {
        let Some((filter, rest)) = split_next_command_filter(filters) else {
            // 终端续延：调用处理器，把成功值搬进结果槽
            return Ok(match invoke.await {
                Outcome::Completed(value) => {
                    cx.set_result(value);
                    Outcome::Completed(Unit)
                }
                Outcome::Faulted(fault) => Outcome::Faulted(fault),
                Outcome::Canceled => Outcome::Canceled,
            });
        };

        {
            let mut executing = ExecutingContext::new(&mut *cx);
            filter.on_executing(&mut executing).await;
        }

        if cx.has_result() {
            debug!(filter = filter.name(), "pre-hook short-circuited the pipeline");
            let mut done = ExecutedContext::succeeded(&mut *cx);
            filter.on_executed(&mut done).await;
            return Ok(Outcome::Completed(Unit));
        }

        match run_filters(rest, &mut *cx, invoke).await? {
            Outcome::Completed(Unit) => {
                let mut done = ExecutedContext::succeeded(&mut *cx);
                filter.on_executed(&mut done).await;
                Ok(Outcome::Completed(Unit))
            }
            Outcome::Faulted(fault) => {
                let state = {
                    let mut done = ExecutedContext::faulted(&mut *cx, fault);
                    filter.on_executed(&mut done).await;
                    done.into_fault_state()
                };
                match state {
                    (Some(fault), false) => Ok(Outcome::Faulted(fault)),
                    (Some(_), true) => {
                        if cx.has_result() {
                            cx.set_exception_handled();
                            debug!(filter = filter.name(), "fault absorbed by post-hook");
                            Ok(Outcome::Completed(Unit))
                        } else {
                            Err(DispatchError::InconsistentFilter {
                                filter: filter.name().to_string(),
                            })
                        }
                    }
                    (None, _) => Ok(Outcome::Completed(Unit)),
                }
            }
            Outcome::Canceled => {
                let mut done = ExecutedContext::canceled(&mut *cx);
                filter.on_executed(&mut done).await;
                Ok(Outcome::Canceled)
            }
        }
    })
}

/// 异常过滤器阶段
///
/// 仅当过滤器链放任故障逃逸时进入：异常能力的过滤器按声明逆序
/// 依次收到故障；首个标记吸收者必须同时给出替代结果；
/// 无人吸收则故障原样交回调用方。
pub async fn run_exception_filters(
    filters: &[Arc<dyn Filter>],
    cx: &mut PipelineContext,
    fault: Fault,
) -> Result<Outcome<Unit>, DispatchError> {
    for filter in filters.iter().rev() {
        if !filter.capability().has_exception() {
            continue;
        }
        let handled = {
            let mut view = ExceptionContext::new(&mut *cx, &fault);
            filter.on_exception(&mut view).await;
            view.is_handled()
        };
        if handled {
            if cx.has_result() {
                cx.set_exception_handled();
                debug!(filter = filter.name(), "fault absorbed by exception filter");
                return Ok(Outcome::Completed(Unit));
            }
            return Err(DispatchError::InconsistentFilter {
                filter: filter.name().to_string(),
            });
        }
    }
    Ok(Outcome::Faulted(fault))
}
