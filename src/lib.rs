//! Xenora - port and vulnerability probe orchestration
//!
//! Xenora runs two external security tools against one target and folds
//! their output into a single outcome with a bounded risk score.
//!
//! ## Components
//!
//! - **Probes** ([`probe`]): nmap for open ports and services, nuclei for
//!   template matches. Each owns its child process and always returns a
//!   terminal result, even on timeout, truncated output or a missing tool.
//! - **Risk** ([`risk`]): pure scoring of both probes' findings.
//! - **Coordinator** ([`coordinator`]): admission control, the global scan
//!   deadline and status merging.
//! - **Sink** ([`sink`]): persistence of finished outcomes.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod probe;
pub mod risk;
pub mod sink;

pub use domain::*;
