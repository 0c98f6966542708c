use clap::Parser;
use mediaq_core::fs_paths::DesktopPaths;

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod storage;

pub fn run() -> i32 {
    let cli = cli::Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return 1;
        }
    };

    match runtime.block_on(cli::execute(cli, &DesktopPaths)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    }
}
