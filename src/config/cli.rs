// src/config/cli.rs - Command-line flags (each can also come from the environment)

use clap::Parser;
use std::path::PathBuf;

use super::TrackerConfig;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML or TOML config file
    #[arg(short, long, env = "PLUSTWO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the live WebSocket sink listens on
    #[arg(long, env = "PLUSTWO_ADDR")]
    pub addr: Option<String>,

    /// Twitch channel to track
    #[arg(long, env = "PLUSTWO_CHANNEL")]
    pub channel: Option<String>,

    /// Window length in seconds
    #[arg(long, env = "PLUSTWO_WINDOW_SECONDS")]
    pub window_seconds: Option<u64>,

    /// File the window records are appended to
    #[arg(long, env = "PLUSTWO_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Field delimiter for the log file
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Reconnect to chat with backoff instead of exiting when the connection drops
    #[arg(long)]
    pub reconnect: bool,

    #[arg(long)]
    pub no_file_sink: bool,

    #[arg(long)]
    pub no_live_sink: bool,

    /// Serve the JSON status API on this port
    #[arg(long)]
    pub status_port: Option<u16>,
}

impl Cli {
    /// Overlay whatever was given on the command line (or env) onto `config`
    pub fn apply(&self, config: &mut TrackerConfig) {
        if let Some(addr) = &self.addr {
            config.live.listen_addr = addr.clone();
        }
        if let Some(channel) = &self.channel {
            config.upstream.channel = channel.clone();
        }
        if let Some(seconds) = self.window_seconds {
            config.window.interval_seconds = seconds;
        }
        if let Some(path) = &self.log_file {
            config.file_sink.path = path.clone();
        }
        if let Some(delimiter) = self.delimiter {
            config.file_sink.delimiter = delimiter;
        }
        if self.reconnect {
            config.upstream.reconnect.enabled = true;
        }
        if self.no_file_sink {
            config.file_sink.enabled = false;
        }
        if self.no_live_sink {
            config.live.enabled = false;
        }
        if let Some(port) = self.status_port {
            config.status.enabled = true;
            config.status.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "plustwo-tracker",
            "--addr",
            "0.0.0.0:9000",
            "--channel",
            "someone",
            "--window-seconds",
            "5",
            "--delimiter",
            " ",
            "--no-file-sink",
        ])
        .unwrap();

        let mut config = TrackerConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.live.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.upstream.channel, "someone");
        assert_eq!(config.window.interval_seconds, 5);
        assert_eq!(config.file_sink.delimiter, ' ');
        assert!(!config.file_sink.enabled);
        assert!(config.live.enabled);
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let cli = Cli::default();
        let mut config = TrackerConfig::default();
        config.window.interval_seconds = 7;
        cli.apply(&mut config);
        assert_eq!(config.window.interval_seconds, 7);
        assert_eq!(config.upstream.channel, "northernlion");
    }
}
