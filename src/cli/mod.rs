//! Programmatic CLI: a [`Command`] per catalog operation and a runner that renders results.

mod command;
mod runner;
mod util;

pub use command::Command;
pub use runner::{OutputMode, run};
pub use util::parse_fields;
