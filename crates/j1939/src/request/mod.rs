//! Request/response on top of a [`Bus`](crate::bus::Bus)
//!
//! A request is a PGN 0xEA00 frame naming the wanted PGN. Answers are either
//! the requested parameter group itself or an acknowledgment (PGN 0xE800)
//! referring to it. [`RequestClient`] hides the retry, busy and
//! acknowledgment handling.

mod ack;
mod client;
mod decoder;
pub mod diagnostic;

pub use ack::{AckCode, Acknowledgment};
pub use client::RequestClient;
pub use decoder::{Decoder, PgnMessage};
pub use diagnostic::{Dm30, Dm7Command, ScaledTestResult};

/// What came back for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<T> {
    Data(T),
    Ack(Acknowledgment),
}

impl<T> Response<T> {
    pub fn data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Ack(_) => None,
        }
    }

    pub fn ack(&self) -> Option<&Acknowledgment> {
        match self {
            Self::Data(_) => None,
            Self::Ack(ack) => Some(ack),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.ack().is_some_and(Acknowledgment::is_busy)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Self::Data(data) => Response::Data(f(data)),
            Self::Ack(ack) => Response::Ack(ack),
        }
    }
}
