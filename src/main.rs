use anyhow::Result;
use clap::Parser;
use fragments::config::ServeArgs;
use fragments::{server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServeArgs::parse();
    telemetry::init(args.log_format)?;
    server::start_server(&args).await
}
