//! Overseer: operations core for a dedicated game server.
//!
//! Supervises the server process (start, stop, restart, scheduled and daily
//! restarts), talks to it over RCON, and tails its log to reward players,
//! relay chat, and answer in-game commands.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod sinks;

pub mod prober;
pub mod rcon;
pub mod supervisor;

pub mod ledger;
pub mod notify;
pub mod pipeline;
