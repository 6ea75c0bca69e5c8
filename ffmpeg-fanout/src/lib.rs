//! Fan one live input out to several encoder processes.
//!
//! ```text
//!                       ┌─► Worker (ffmpeg ... -f flv rtmp://twitch) ─┐
//! FanoutSettings ─► jobs├─► Worker (ffmpeg ... -f flv rtmp://kick)  ──┼─► output queue ─► console
//!                       └─► Worker (ffmpeg ... -rtsp_flags listen)  ──┘
//! ```
//!
//! The [`supervisor::Supervisor`] owns every worker; on cancellation the
//! [`shutdown::ShutdownCoordinator`] interrupts them in start order and
//! waits until all have exited.

pub mod command;
pub mod error;
pub mod shutdown;
pub mod supervisor;
pub mod types;
pub mod worker;

pub use error::{FanoutError, Result};
pub use supervisor::{RunExit, Supervisor};
pub use types::{FanoutSettings, OutputTarget, ShutdownMode, ShutdownPolicy};
