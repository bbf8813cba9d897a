//! 完成原语统一错误定义
//!
use thiserror::Error;

/// 统一错误类型（完成原语最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CompletionError {
    /// 非法延时：负值（无限哨兵除外）在计时器创建前即报错
    #[error("invalid delay: {millis} ms")]
    InvalidDelay { millis: i64 },

    /// 重复解析：完成体只允许进入一次终态，二次解析是契约违规
    #[error("completion already resolved: attempted={attempted}, current={current}")]
    AlreadyResolved {
        attempted: &'static str,
        current: &'static str,
    },
}

/// 统一 Result 类型别名
pub type CompletionResult<T> = Result<T, CompletionError>;
