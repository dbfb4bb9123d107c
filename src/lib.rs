//! scinsynth is a graphical synthesis server: clients send declarative
//! definitions of visual signal graphs ("ScinthDefs") over OSC, the server
//! compiles them into GPU shader pipelines and runs instances of them
//! ("Scinths") against a window or an offscreen encoding surface.

pub mod av;
pub mod base;
pub mod config;
pub mod error;
pub mod osc;
pub mod render;
pub mod server;

pub use error::{Error, Result};

/// Version string reported by the /scin_version command.
pub const VERSION: &str = const_format::concatcp!("scinsynth ", env!("CARGO_PKG_VERSION"));
