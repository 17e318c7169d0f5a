use clap::Parser;
use dotenv::dotenv;
use std::env;

pub const DEFAULT_API_PORT: u16 = 3500;
pub const DEFAULT_CMD_PORT: u16 = 3501;
pub const DEFAULT_API_VERSION: &str = "0.13";

/// Command-line options of the emulator binary.
#[derive(Debug, Parser)]
#[command(name = "catenis-api-emulator", version, about = "Catenis API emulator")]
pub struct CliOptions {
    /// Port the emulated Catenis API listens on
    #[arg(long = "api-port", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port the control-plane command server listens on
    #[arg(long = "cmd-port", default_value_t = DEFAULT_CMD_PORT)]
    pub cmd_port: u16,

    /// Version segment of the emulated API base path (/api/<version>/)
    #[arg(long = "api-version", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Shut down a running emulator instance and exit
    #[arg(long)]
    pub shutdown: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub cmd_port: u16,
    pub api_version: String,
    pub log_level: String,
}

impl Config {
    pub fn from_options(options: &CliOptions) -> Self {
        // Load .env file if present
        dotenv().ok();

        Config {
            api_port: options.api_port,
            cmd_port: options.cmd_port,
            api_version: options.api_version.clone(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Base path every emulated API method lives under, with a trailing slash.
    pub fn api_base_path(&self) -> String {
        format!("/api/{}/", self.api_version)
    }
}
