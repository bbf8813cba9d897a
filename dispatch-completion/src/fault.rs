use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// 故障载体（Fault）
///
/// 包装任意错误原因，并携带一组随故障对象本身传播的“已记录方”标记：
/// - 克隆共享同一内部状态，跨管线、过滤器与调用方传递时保持同一实例语义；
/// - 同一故障在多个日志协作方之间只记录一次：首个标记成功者负责记录，
///   后续标记者得到 `false` 并跳过。
#[derive(Clone)]
pub struct Fault {
    inner: Arc<FaultInner>,
}

struct FaultInner {
    cause: anyhow::Error,
    logged_by: Mutex<HashSet<String>>,
}

impl Fault {
    /// 以任意错误原因构造故障
    pub fn new(cause: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: Arc::new(FaultInner {
                cause: cause.into(),
                logged_by: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// 以一段消息构造故障
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    /// 原始错误原因
    pub fn cause(&self) -> &anyhow::Error {
        &self.inner.cause
    }

    /// 判断原因是否为指定错误类型
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.cause.is::<E>()
    }

    /// 以指定错误类型观察原因
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.cause.downcast_ref::<E>()
    }

    /// 尝试以 `logger` 名义标记“已记录”
    ///
    /// 返回 `true` 表示本次是该记录方对此故障实例的首次标记，应当记录日志；
    /// 返回 `false` 表示此前已有同名记录方标记过，应当跳过以避免重复记录。
    pub fn try_mark_logged(&self, logger: &str) -> bool {
        self.logged_by_guard().insert(logger.to_string())
    }

    /// 已标记过的记录方名单（快照）
    pub fn logged_by(&self) -> Vec<String> {
        self.logged_by_guard().iter().cloned().collect()
    }

    fn logged_by_guard(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.inner.logged_by.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.cause, f)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner.cause, f)
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.cause.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_logger_marks_repeat_loggers_skip() {
        let fault = Fault::msg("boom");
        assert!(fault.try_mark_logged("audit"));
        assert!(!fault.try_mark_logged("audit"));
        // 不同名义的记录方互不影响
        assert!(fault.try_mark_logged("console"));
    }

    #[test]
    fn clones_share_logged_markers() {
        let fault = Fault::msg("boom");
        let cloned = fault.clone();
        assert!(fault.try_mark_logged("audit"));
        assert!(!cloned.try_mark_logged("audit"));
        assert_eq!(cloned.logged_by().len(), 1);
    }

    #[test]
    fn display_preserves_cause() {
        let fault = Fault::msg("connection refused");
        assert_eq!(fault.to_string(), "connection refused");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("typed failure: {code}")]
    struct TypedFailure {
        code: u32,
    }

    #[test]
    fn downcast_reaches_original_cause() {
        let fault = Fault::new(TypedFailure { code: 7 });
        assert!(fault.is::<TypedFailure>());
        assert_eq!(fault.downcast_ref::<TypedFailure>().map(|e| e.code), Some(7));
    }
}
