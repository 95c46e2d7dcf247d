//! External scanning tools wrapped as probes.
//!
//! Each probe turns one tool run into a terminal [`ProbeResult`](crate::ProbeResult):
//! it never panics or propagates errors to the caller, and it stops its
//! child process on deadline, cap or cancellation.

pub mod error;
pub mod port;
pub mod runner;
pub mod vuln;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ProbeError;
pub use port::PortProbe;
pub use runner::{ExitInfo, ProcessError, ProcessHandle, ProcessRunner, TokioProcessRunner, ToolCommand};
pub use vuln::VulnProbe;
