//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::AppConfig;

/// Browse PostgreSQL metadata and run SQL from the browser.
#[derive(Debug, Parser)]
#[command(name = "sysadmin", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long)]
    pub verbose: bool,

    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface to listen on.
    #[arg(long)]
    pub hostname: Option<String>,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Flags given on the command line win over the file.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(hostname) = &self.hostname {
            config.listener.hostname = hostname.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from(["sysadmin", "-v", "--port", "8080", "--hostname", "0.0.0.0"])
            .unwrap();
        assert!(cli.verbose);

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.listener.address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["sysadmin", "--config", "site.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("site.toml")));

        let mut config = AppConfig::default();
        config.listener.port = 9000;
        cli.apply(&mut config);
        assert_eq!(config.listener.port, 9000);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["sysadmin", "--port", "99999"]).is_err());
    }
}
