pub mod call;
pub mod launch;
pub mod record;
pub mod serve;
pub mod tools_cmd;

use std::path::PathBuf;

use pagehost_core::config::HostConfig;
use pagehost_host::HostClient;
use tokio::process::Command;

/// The message a user should see: remote errors without their RPC framing.
pub fn error_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<pagehost_core::Error>() {
        Some(e) => e.rpc_message(),
        None => err.to_string(),
    }
}

fn current_exe() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_exe()?)
}

/// Spawn `pagehost serve` and wait until it accepts requests.
pub async fn start_host(config: &HostConfig, verbose: bool) -> anyhow::Result<HostClient> {
    let mut cmd = Command::new(current_exe()?);
    cmd.arg("serve");
    if verbose {
        cmd.arg("--verbose");
    }
    Ok(HostClient::start(cmd, config).await?)
}
