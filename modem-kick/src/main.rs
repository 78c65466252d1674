use clap::Parser as _;
use color_eyre::eyre::{bail, Result, WrapErr as _};
use futures::{stream::FuturesUnordered, StreamExt as _};
use orb_modem_kick::{modem_manager::ModemManagerService, telemetry, Args, Config};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "worldcoin-modem-kick";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    telemetry::try_init(SYSLOG_IDENTIFIER)?;

    let result = async {
        let config = Config::try_from(Args::parse())?;
        let system_bus = zbus::Connection::system()
            .await
            .wrap_err("failed to connect to the system bus")?;

        let shutdown = CancellationToken::new();
        let mut tasks: FuturesUnordered<_> = orb_modem_kick::program()
            .config(config)
            .modem_service(ModemManagerService::new(system_bus))
            .shutdown(shutdown.clone())
            .run()
            .await?
            .into_iter()
            .collect();

        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let mut sigint = unix::signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => warn!("received SIGTERM"),
            _ = sigint.recv()  => warn!("received SIGINT"),
            Some(result) = tasks.next() => {
                result??;
                bail!("a task exited before shutdown was requested");
            }
        }

        info!("stopping tasks and exiting gracefully");
        shutdown.cancel();

        while let Some(result) = tasks.next().await {
            result??;
        }

        Ok(())
    }
    .await;

    telemetry::flush();

    result
}
