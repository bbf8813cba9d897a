use crate::completion::Completion;
use crate::error::CompletionError;
use crate::outcome::{Outcome, Unit};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 无限等待的毫秒哨兵值
pub const INFINITE: i64 = -1;

/// 延时（Delay）
///
/// - `millis == 0`：同步成功，不触碰计时器；
/// - `millis == INFINITE`：永不自行完成，仅随取消信号进入 Canceled；
/// - 其余负值：在计时器创建之前即以 [`CompletionError::InvalidDelay`] 故障；
/// - 正值：计时与取消信号竞争，先到者决定终态。
pub fn delay_millis(millis: i64, token: &CancellationToken) -> Completion<Unit> {
    if millis < 0 && millis != INFINITE {
        return Completion::faulted(CompletionError::InvalidDelay { millis });
    }
    if token.is_cancelled() {
        return Completion::canceled();
    }
    if millis == 0 {
        return Completion::completed(Unit);
    }

    let token = token.clone();
    if millis == INFINITE {
        return Completion::from_future(async move {
            token.cancelled().await;
            Outcome::Canceled
        });
    }

    let duration = Duration::from_millis(millis as u64);
    Completion::from_future(async move {
        tokio::select! {
            _ = token.cancelled() => Outcome::Canceled,
            _ = tokio::time::sleep(duration) => Outcome::Completed(Unit),
        }
    })
}
