//! 完成原语基础库（dispatch-completion）
//!
//! 提供“稍后才有结果的值”的统一表达与组合构件，用于在分发管线中以同一套
//! 代码处理同步完成、异步完成、故障与取消四种终态：
//! - 终态模型（`outcome`）：`Outcome`（Completed/Faulted/Canceled）与 `Unit` 空载荷标记
//! - 完成体（`completion`）：`Completion` 哨兵构造、`then` 续延与 `CompletionSource`
//! - 顺序组合（`sequence`）：逐个执行、首个故障/取消即短路、同步前缀迭代消化
//! - 定时（`delay`）：毫秒延时、无限哨兵与取消信号竞争
//! - 故障载体（`fault`）：携带“已记录方”标记集的可克隆故障对象
//!
//! 本 crate 不依赖分发引擎，仅定义完成语义与最小必要的错误类型，
//! 以便引擎层与任意宿主在其上组合自己的执行流程。
//!
pub mod completion;
pub mod delay;
pub mod error;
pub mod fault;
pub mod outcome;
pub mod sequence;

pub use completion::{Completion, CompletionSource};
pub use delay::{INFINITE, delay_millis};
pub use error::{CompletionError, CompletionResult};
pub use fault::Fault;
pub use outcome::{Outcome, Unit, transfer_state};
pub use sequence::{Step, sequence, step};
pub use tokio_util::sync::CancellationToken;
