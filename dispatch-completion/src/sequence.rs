use crate::completion::Completion;
use crate::outcome::{Outcome, Unit};
use tokio_util::sync::CancellationToken;

/// 顺序步骤：惰性启动，被轮到时才真正开始执行
pub type Step = Box<dyn FnOnce() -> Completion<Unit> + Send>;

/// 包装一个闭包为 [`Step`]
pub fn step<F>(f: F) -> Step
where
    F: FnOnce() -> Completion<Unit> + Send + 'static,
{
    Box::new(f)
}

/// 顺序执行（Sequence）
///
/// 按给定次序逐个启动步骤：
/// - 每步启动前检查取消信号，已触发则以 Canceled 短路（不打断已在执行的步骤）；
/// - 首个 Faulted/Canceled 即为整体终态，其后的步骤不会启动；
/// - 全部成功时整体成功，无载荷；空序列直接成功。
///
/// 同步完成的前缀在普通循环中消化，不产生嵌套续延；遇到首个未解析
/// 步骤时整体转入一个同样迭代式的异步循环，每个未解析步骤恰好挂起、
/// 恢复一次，已完成的步骤不会重跑。
pub fn sequence<I>(steps: I, token: &CancellationToken) -> Completion<Unit>
where
    I: IntoIterator<Item = Step>,
    I::IntoIter: Send + 'static,
{
    let mut iter = steps.into_iter();
    let token = token.clone();

    loop {
        if token.is_cancelled() {
            return Completion::canceled();
        }
        let Some(next) = iter.next() else {
            return Completion::completed(Unit);
        };
        match next().try_now() {
            Ok(Outcome::Completed(_)) => continue,
            Ok(Outcome::Faulted(fault)) => return Completion::from_fault(fault),
            Ok(Outcome::Canceled) => return Completion::canceled(),
            Err(pending) => {
                return Completion::from_future(async move {
                    match pending.outcome().await {
                        Outcome::Completed(_) => {}
                        Outcome::Faulted(fault) => return Outcome::Faulted(fault),
                        Outcome::Canceled => return Outcome::Canceled,
                    }
                    loop {
                        if token.is_cancelled() {
                            return Outcome::Canceled;
                        }
                        let Some(next) = iter.next() else {
                            return Outcome::Completed(Unit);
                        };
                        match next().outcome().await {
                            Outcome::Completed(_) => {}
                            Outcome::Faulted(fault) => return Outcome::Faulted(fault),
                            Outcome::Canceled => return Outcome::Canceled,
                        }
                    }
                });
            }
        }
    }
}
