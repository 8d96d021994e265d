use std::path::PathBuf;

use clap::Parser;

/// Bind address and persistence paths, clap-derived over CLI flags and
/// environment variables. Precedence is CLI > env > the config file's own
/// `host`/`port` fields.
#[derive(Debug, Clone, Parser)]
#[command(name = "relayd", version, about = "Claude Messages API multiplexer")]
pub struct CliArgs {
    /// Path to the upstream pool config file.
    #[arg(long, env = "RELAYD_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Bind host, overriding the config file's `host`.
    #[arg(long, env = "RELAYD_HOST")]
    pub host: Option<String>,

    /// Bind port, overriding the config file's `port`.
    #[arg(long, env = "RELAYD_PORT")]
    pub port: Option<u16>,

    /// Directory holding `stats.json`.
    #[arg(long, env = "RELAYD_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Optional outbound proxy URL for upstream requests.
    #[arg(long, env = "RELAYD_PROXY")]
    pub proxy: Option<String>,
}

impl CliArgs {
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
}
