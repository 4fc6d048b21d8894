use clap::Parser;

use usdt_rates::config::Config;
use usdt_rates::lifecycle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    if let Err(e) = lifecycle::run(config).await {
        tracing::error!(error = %e, "fatal error");
        return Err(e.into());
    }
    Ok(())
}
