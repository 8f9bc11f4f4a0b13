//! Settings are read once at startup from a TOML file. `--settings <path>`
//! overrides the build-dependent default.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
