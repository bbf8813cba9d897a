use dispatch_completion::{CompletionError, Fault};

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("completion: {0}")]
    Completion(#[from] CompletionError),

    #[error("handler not found: {0}")]
    HandlerNotFound(&'static str),

    #[error("handler already registered: command={command}")]
    AlreadyRegistered { command: &'static str },

    #[error("activation failed: handler={handler}: {source}")]
    Activation {
        handler: &'static str,
        #[source]
        source: Fault,
    },

    #[error("handler fault: {0}")]
    Handler(Fault),

    #[error("inconsistent filter: {filter} marked the fault handled without a result")]
    InconsistentFilter { filter: String },

    #[error("dispatch canceled: command={0}")]
    Canceled(&'static str),

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// 统一 Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;
