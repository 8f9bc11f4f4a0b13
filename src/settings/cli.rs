use super::Parser;

/// countersign session server.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Path to a TOML settings file.
    #[arg(long)]
    pub settings: Option<String>,
}
