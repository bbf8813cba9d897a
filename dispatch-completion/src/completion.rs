use crate::error::{CompletionError, CompletionResult};
use crate::fault::Fault;
use crate::outcome::{Outcome, transfer_state};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::oneshot;

enum State<T> {
    /// 已解析：观察时零调度开销
    Ready(Outcome<T>),
    /// 由一段未完成的异步工作驱动
    Deferred(BoxFuture<'static, Outcome<T>>),
    /// 由 [`CompletionSource`] 在别处解析
    Waiting(oneshot::Receiver<Outcome<T>>),
}

/// 完成体（Completion）
///
/// 表示“稍后才有结果的值”，无论生产方在观察之前是否已经完成，
/// 消费代码都走同一条路径：
/// - 哨兵构造（`completed`/`faulted`/`canceled`）返回已解析实例；
/// - `then` 在成功后串接续延，已解析时同步执行，不引入调度；
/// - `outcome` 一次性取出终态，未解析时挂起等待。
pub struct Completion<T> {
    state: State<T>,
}

impl<T: Send + 'static> Completion<T> {
    /// 已成功完成的哨兵
    pub fn completed(value: T) -> Self {
        Self::from_outcome(Outcome::Completed(value))
    }

    /// 已故障的哨兵
    pub fn faulted(cause: impl Into<anyhow::Error>) -> Self {
        Self::from_fault(Fault::new(cause))
    }

    /// 携带既有故障对象的哨兵（保留其标记状态）
    pub fn from_fault(fault: Fault) -> Self {
        Self::from_outcome(Outcome::Faulted(fault))
    }

    /// 已取消的哨兵
    pub fn canceled() -> Self {
        Self::from_outcome(Outcome::Canceled)
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self {
            state: State::Ready(outcome),
        }
    }

    /// 由异步工作驱动的完成体
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self {
            state: State::Deferred(future.boxed()),
        }
    }

    /// 是否已解析（无需挂起即可观察）
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// 已解析则取出终态，否则原样返还
    pub fn try_now(self) -> Result<Outcome<T>, Self> {
        match self.state {
            State::Ready(outcome) => Ok(outcome),
            pending => Err(Self { state: pending }),
        }
    }

    /// 取出终态；未解析时挂起等待
    ///
    /// 生产方在未解析前消失（source 被丢弃）视同取消。
    pub async fn outcome(self) -> Outcome<T> {
        match self.state {
            State::Ready(outcome) => outcome,
            State::Deferred(future) => future.await,
            State::Waiting(receiver) => receiver.await.unwrap_or(Outcome::Canceled),
        }
    }

    /// 成功后串接续延
    ///
    /// - 本体已成功解析时，续延同步执行；
    /// - 故障或取消原样传播，续延不执行。
    pub fn then<U, F>(self, continuation: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        match self.state {
            State::Ready(Outcome::Completed(value)) => continuation(value),
            State::Ready(Outcome::Faulted(fault)) => Completion::from_fault(fault),
            State::Ready(Outcome::Canceled) => Completion::canceled(),
            pending => Completion::from_future(async move {
                match (Self { state: pending }).outcome().await {
                    Outcome::Completed(value) => continuation(value).outcome().await,
                    Outcome::Faulted(fault) => Outcome::Faulted(fault),
                    Outcome::Canceled => Outcome::Canceled,
                }
            }),
        }
    }

    /// 跨结果类型搬运终态（见 [`transfer_state`]）
    pub fn transfer<U>(self) -> Completion<U>
    where
        T: Any,
        U: Any + Default + Send + 'static,
    {
        match self.state {
            State::Ready(outcome) => Completion::from_outcome(transfer_state(outcome)),
            pending => Completion::from_future(async move {
                transfer_state((Self { state: pending }).outcome().await)
            }),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Ready(_) => "Ready",
            State::Deferred(_) => "Deferred",
            State::Waiting(_) => "Waiting",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

struct SourceInner<T> {
    sender: Option<oneshot::Sender<Outcome<T>>>,
    state: &'static str,
}

/// 完成源（CompletionSource）
///
/// 完成体的生产侧：`complete`/`fault`/`cancel` 恰好解析一次；
/// 二次解析是契约违规，返回 [`CompletionError::AlreadyResolved`]
/// （上报而非静默忽略），已有终态不会被覆盖。
pub struct CompletionSource<T> {
    inner: Mutex<SourceInner<T>>,
}

impl<T: Send + 'static> CompletionSource<T> {
    /// 创建一对（生产侧，消费侧）
    pub fn new() -> (Self, Completion<T>) {
        let (sender, receiver) = oneshot::channel();
        let source = Self {
            inner: Mutex::new(SourceInner {
                sender: Some(sender),
                state: "pending",
            }),
        };
        let completion = Completion {
            state: State::Waiting(receiver),
        };
        (source, completion)
    }

    /// 以成功值解析
    pub fn complete(&self, value: T) -> CompletionResult<()> {
        self.resolve(Outcome::Completed(value), "completed")
    }

    /// 以故障解析
    pub fn fault(&self, cause: impl Into<anyhow::Error>) -> CompletionResult<()> {
        self.resolve(Outcome::Faulted(Fault::new(cause)), "faulted")
    }

    /// 以取消解析
    pub fn cancel(&self) -> CompletionResult<()> {
        self.resolve(Outcome::Canceled, "canceled")
    }

    fn resolve(&self, outcome: Outcome<T>, attempted: &'static str) -> CompletionResult<()> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.sender.take() {
            Some(sender) => {
                inner.state = attempted;
                // 消费侧已放弃时结果无人接收，直接丢弃
                let _ = sender.send(outcome);
                Ok(())
            }
            None => Err(CompletionError::AlreadyResolved {
                attempted,
                current: inner.state,
            }),
        }
    }
}
