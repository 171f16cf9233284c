//! Terminal link protocol: wire framing, command envelopes, and the
//! per-command session engine.

pub mod envelope;
pub mod frame;
pub mod session;

pub use envelope::{build_command_envelope, next_request_id, FrameClass};
pub use frame::{encode_frame, FrameDecoder, FrameError};
pub use session::{send_command, ErrorKind, SessionEvent, SessionOutcome, Timeouts};
