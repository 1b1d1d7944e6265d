//! Command-line front end for a cluster member.
//!
//! Provides:
//! - clap configuration for the `member` and `introducer` modes
//! - The line-oriented command shell driving a `Member`
//! - Tracing subscriber setup

pub mod commands;
pub mod config;
pub mod logging;
pub mod shell;

pub use commands::{Command, CommandError, CommandResult};
pub use config::{CliConfig, IntroducerArgs, MemberArgs, Mode};
