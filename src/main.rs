// CLI main entry point
use anyhow::Result;
use fininsight::app::run;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments and run
    run().await?;

    Ok(())
}
