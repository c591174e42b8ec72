//! Transport-neutral core of the realtime relay.
//!
//! A relay session pairs one browser connection with one upstream realtime
//! API connection, sends the fixed `session.update` configuration once the
//! upstream handshake completes, and then forwards messages verbatim in both
//! directions until either side goes away.

pub mod error;
pub mod frame;
pub mod protocol;
pub mod session;

pub use error::RelayError;
pub use frame::{CloseReason, Frame, FrameSink, FrameStream};
pub use protocol::{EventKind, RelayNotice, SessionConfig, SessionUpdate};
pub use session::{
    RelaySession, RelaySettings, SessionState, SessionSummary, UpstreamConnector, UpstreamLink,
};
