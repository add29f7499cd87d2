use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    roundcast::cli::run().await
}
