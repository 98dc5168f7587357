//! Client for the chat application's local presence service.

pub mod connector;
pub mod framing;
pub mod protocol;
pub mod session;

pub use connector::{endpoint_path, BoxedIpcStream, IpcConnector, IpcStream, LocalIpcConnector};
pub use framing::{Frame, FrameError, Opcode, MAX_FRAME_BYTES};
pub use session::{spawn_presence_session, LinkError, PresenceSessionHandle, SessionConfig};
