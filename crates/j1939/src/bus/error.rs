//! Bus errors

use thiserror::Error;

use crate::tp::SessionAbort;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Transport session failed: {0}")]
    Transport(#[from] SessionAbort),

    #[error("Adapter error: {0}")]
    Adapter(String),
}
