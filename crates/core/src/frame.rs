//! Transport-neutral WebSocket frames.
//!
//! Both the downstream (browser) and upstream (realtime API) connections are
//! adapted into a [`FrameSink`] / [`FrameStream`] pair so the relay session
//! never depends on a particular WebSocket library.

use crate::error::RelayError;
use bytes::Bytes;
use futures::{Sink, Stream};
use std::borrow::Cow;
use std::pin::Pin;

/// The close code sent when the relay tears a connection down itself.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        }
    }
}

/// A single WebSocket message, independent of the library that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Returns the payload as text for data frames, decoding binary payloads
    /// as UTF-8 (lossily). Control frames have no text.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Frame::Text(text) => Some(Cow::Borrowed(text.as_str())),
            Frame::Binary(data) => Some(String::from_utf8_lossy(data)),
            _ => None,
        }
    }
}

/// The sending half of an adapted connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RelayError> + Send>>;

/// The receiving half of an adapted connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, RelayError>> + Send>>;
