//! I/O layer - process management and stream forwarding
//!
//! - **Process**: spawning the wrapped server and owning its lifecycle
//! - **Forward**: the per-direction loops that move bytes between streams
//!
//! Neither module knows which framing convention is in use; codecs are
//! passed in by the bridge.

pub mod forward;
pub mod process;

// Re-export main types for convenience
pub use forward::{Direction, ForwardReport, copy_stream, forward_messages};
pub use process::{ChildProcessManager, ProcessError, Terminator};
