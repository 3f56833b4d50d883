//! PGN decoders
//!
//! A message type either implements [`PgnMessage`] (static selection through
//! generics) or is described at runtime by a [`Decoder`] value. Decode
//! failures are silent: the frame is simply not a match.

use crate::frame::Frame;

/// A parameter group with a fixed PGN and a decoder
pub trait PgnMessage: Sized + Send {
    const PGN: u32;

    fn decode(frame: &Frame) -> Option<Self>;

    /// Cheap pre-check run before `decode`
    fn is_valid(_frame: &Frame) -> bool {
        true
    }
}

/// PGN, validity predicate and decode function bundled as a value
pub struct Decoder<T> {
    pgn: u32,
    accepts: fn(&Frame) -> bool,
    decode: fn(&Frame) -> Option<T>,
}

impl<T> Clone for Decoder<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Decoder<T> {}

impl<T> std::fmt::Debug for Decoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("pgn", &format_args!("{:06X}", self.pgn))
            .finish()
    }
}

impl<T> Decoder<T> {
    pub fn new(pgn: u32, decode: fn(&Frame) -> Option<T>) -> Self {
        Self {
            pgn,
            accepts: |_| true,
            decode,
        }
    }

    pub fn with_validity(mut self, accepts: fn(&Frame) -> bool) -> Self {
        self.accepts = accepts;
        self
    }

    pub fn pgn(&self) -> u32 {
        self.pgn
    }

    /// Decode `frame` if it carries this PGN and passes the validity check
    pub fn decode(&self, frame: &Frame) -> Option<T> {
        if frame.pgn() != self.pgn || !(self.accepts)(frame) {
            return None;
        }
        (self.decode)(frame)
    }
}

impl<T: PgnMessage> Decoder<T> {
    pub fn of() -> Self {
        Self::new(T::PGN, T::decode).with_validity(T::is_valid)
    }
}

impl Decoder<Frame> {
    /// Pass matching frames through undecoded
    pub fn raw(pgn: u32) -> Self {
        Self::new(pgn, |frame| Some(frame.clone()))
    }
}
