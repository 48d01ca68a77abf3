use std::fs::File;

use anyhow::{Context, Result};
use doc_ledger::{
    bin_utils::Service,
    config::{LedgerConfig, TransferPolicy},
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("Expected a file name as the first argument")?;
    let strict = args.any(|arg| arg == "--strict");
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let config = LedgerConfig {
        transfer_policy: if strict {
            TransferPolicy::strict()
        } else {
            TransferPolicy::default()
        },
        ..Default::default()
    };
    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err}")),
    };
    service.run()
}
