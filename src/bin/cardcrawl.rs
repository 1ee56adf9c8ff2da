use anyhow::Result;
use cardcrawl::logging::init_tracing;
use cardcrawl::{run_sync, Cli};
use clap::Parser;

fn main() -> Result<()> {
    init_tracing();
    run_sync(Cli::parse())
}
