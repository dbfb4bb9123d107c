//! The control plane: OSC command table, dispatcher and the UDP listen
//! loop. Every server address starts with the reserved `/scin_` prefix so
//! a colocated audio server never mistakes our traffic for its own.

pub mod commands;
pub mod dispatcher;
pub mod server;

pub use commands::{Command, COMMAND_PREFIX};
pub use dispatcher::Dispatcher;
pub use server::OscServer;
