// comm core error taxonomy; wire-level errors live in comm_protocol
use comm_protocol::FrameError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommsError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("outbound queue full (depth {depth})")]
    QueueFull { depth: usize },
    #[error("retry ceiling exceeded; in-flight message abandoned")]
    RetryExhausted,
}
