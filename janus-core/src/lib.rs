// Platform-independent pieces of the Janus video-call client.
// Nothing in here performs I/O; the runtime side lives in `janus-videocall`.

pub mod events;
pub mod protocol;
pub mod state;
pub mod stats;
pub mod transaction;
pub mod videocall;
