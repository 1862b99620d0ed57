use std::sync::Arc;
use std::time::Duration;

use pagehost_core::{Config, Paths};
use pagehost_host::protocol::READY_LINE;
use pagehost_host::{ExitWatchdog, HostServer, ServeEnd};
use pagehost_tools::{BrowsingSession, ToolRegistry};
use tokio::io::BufReader;
use tracing::{info, warn};

use super::launch::SelfLauncher;

/// Run the JSON-RPC host on stdin/stdout until shutdown, end of input or a signal.
pub async fn run(paths: &Paths, config: Config) -> anyhow::Result<i32> {
    let watchdog = ExitWatchdog::new(Duration::from_millis(config.host.exit_grace_ms));
    watchdog.install_signal_handlers()?;

    let session = Arc::new(BrowsingSession::new(
        config.clone(),
        paths,
        Some(Arc::new(SelfLauncher)),
    ));
    let server = HostServer::new(ToolRegistry::with_defaults(), session, config);

    eprintln!("{}", READY_LINE);
    info!(pid = std::process::id(), "Host serving on stdio");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        end = server.serve(stdin, stdout) => match end {
            Ok(ServeEnd::Shutdown) => {
                watchdog.trigger("shutdown request");
            }
            Ok(ServeEnd::InputClosed) => {
                watchdog.trigger("stdin closed");
            }
            Err(e) => {
                warn!(error = %e, "Host loop failed");
                watchdog.trigger("host loop failed");
            }
        },
        _ = watchdog.triggered() => {}
    }

    let outcome = watchdog
        .shutdown(async {
            server.session().disconnect_rpc().await;
            Ok(())
        })
        .await;
    info!(?outcome, "Host exiting");
    Ok(outcome.exit_code())
}
