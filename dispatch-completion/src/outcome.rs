use crate::fault::Fault;
use std::any::Any;

/// 操作终态（Outcome）
///
/// 一次可能异步的操作最终只会进入三种终态之一：
/// - `Completed`：成功并携带结果值；
/// - `Faulted`：因故障结束，携带 [`Fault`]；
/// - `Canceled`：被协作式取消。
///
/// 终态一旦产生即不可逆，消费方恰好消费一次。
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Faulted(Fault),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// 对成功值做映射；故障与取消原样传播
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Completed(value) => Outcome::Completed(f(value)),
            Self::Faulted(fault) => Outcome::Faulted(fault),
            Self::Canceled => Outcome::Canceled,
        }
    }

    /// 观察故障（如有）
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// 空载荷标记：表示“无有意义返回值”的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unit;

/// 跨结果类型搬运终态（TransferState）
///
/// 将一个已解析终态复制进另一结果类型的槽位：
/// - 运行时类型一致时移动原值；
/// - 不一致时以目标类型的中性默认值替代（不抛错）；
/// - 故障与取消不受结果类型影响，原样搬运。
pub fn transfer_state<T, U>(source: Outcome<T>) -> Outcome<U>
where
    T: Any + Send,
    U: Any + Default,
{
    match source {
        Outcome::Completed(value) => {
            let boxed: Box<dyn Any> = Box::new(value);
            match boxed.downcast::<U>() {
                Ok(same) => Outcome::Completed(*same),
                Err(_) => Outcome::Completed(U::default()),
            }
        }
        Outcome::Faulted(fault) => Outcome::Faulted(fault),
        Outcome::Canceled => Outcome::Canceled,
    }
}
