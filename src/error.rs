use std::io;

use crate::protocol::ControllerMode;

/// Errors returned by controller operations.
///
/// Everything except `Transport` is a precondition failure: it is raised before
/// any byte reaches the link and indicates the caller issued a command out of order.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("command requires {required:?} mode, controller is in {current:?}")]
    ProtocolState {
        required: ControllerMode,
        current: ControllerMode,
    },

    #[error("mode {0:?} cannot be requested by the host")]
    UnsendableMode(ControllerMode),

    #[error("payload carries {actual} entries, device expects {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("device handshake has not completed")]
    NotInitialized,

    #[error("no device connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
