use pagehost_core::Config;
use tracing::debug;

/// List the tools the host serves.
pub async fn list(config: &Config, verbose: bool) -> anyhow::Result<i32> {
    let client = super::start_host(&config.host, verbose).await?;
    let tools = client.list_tools().await;
    if let Err(e) = client.shutdown().await {
        debug!(error = %e, "Host shutdown failed");
    }
    let tools = tools?;

    let width = tools.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    println!("Available tools ({}):", tools.len());
    for (name, description) in &tools {
        println!("  {:<width$}  {}", name, description, width = width);
    }
    Ok(0)
}
