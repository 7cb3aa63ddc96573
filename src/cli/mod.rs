//! CLI subcommand implementations for the chaff binary.

pub mod output;
pub mod restart_cmd;
pub mod start;
pub mod stats_cmd;
pub mod status;
pub mod stop;
