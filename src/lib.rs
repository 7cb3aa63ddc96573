//! Decoy browsing runtime.
//!
//! chaff keeps a small pool of disposable browser tabs busy with plausible
//! background traffic. It watches the pages it opens for third-party
//! audiences, cross-references shared ad and analytics endpoints to surface
//! new first-party origins, and feeds those into a visit queue. A scheduler
//! drains the queue on a jittered timer, and each opened tab runs one short
//! scripted session (read the page, follow a link, or type a keyword
//! search) before the tab is recycled.

pub mod behavior;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod host;
pub mod observer;
pub mod orchestrator;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session_log;
pub mod stats;
