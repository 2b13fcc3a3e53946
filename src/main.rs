// src/main.rs

use std::process::ExitCode;

use procpipes::{cli, logging, run_cli};

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("procpipes error: {err:?}");
            ExitCode::from(2)
        }
    }
}

async fn run_main() -> anyhow::Result<ExitCode> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run_cli(args).await
}
