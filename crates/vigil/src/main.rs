//! vigil - Language server that lints YAML/JSON API descriptions
//!
//! Speaks LSP over stdio. Logs go to stderr, filtered by `VIGIL_LOG`
//! (or `--log-level`).

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;
use vigil::server::{self, ServerOptions};

/// Environment variable holding the default log filter
const LOG_ENV: &str = "VIGIL_LOG";

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Log filter (e.g. `debug`, `vigil=trace`); overrides VIGIL_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Also watch ruleset files from the server, for clients that ignore
    /// `vigil/startWatcher`
    #[arg(long)]
    watch_rulesets: bool,
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("Invalid log level '{level}'"))?,
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // stdout carries the LSP stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref())?;

    tracing::info!("starting vigil {}", env!("CARGO_PKG_VERSION"));
    server::run(ServerOptions {
        watch_rulesets: args.watch_rulesets,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["vigil", "--log-level", "debug", "--watch-rulesets"])
            .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.watch_rulesets);

        let args = Args::try_parse_from(["vigil"]).unwrap();
        assert!(args.log_level.is_none());
        assert!(!args.watch_rulesets);
    }
}
