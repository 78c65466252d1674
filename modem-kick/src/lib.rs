//! Watchdog for cellular modems that lose their network registration.
//!
//! A modem sitting in the idle or denied registration state for too long is
//! disabled, dropped to low power and enabled again through ModemManager.

use color_eyre::Result;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod config;
pub mod daemon;
pub mod idle;
pub mod kick;
pub mod modem;
pub mod modem_manager;
pub mod registration;
pub mod registry;
pub mod supervisor;
pub mod telemetry;

pub use config::{Args, Config, ConfigError, Timing};
pub use daemon::{Daemon, Event, EventSender};
pub use supervisor::{ModemService, ObjectEvent, Presence, ServiceClient, ServiceSupervisor};

pub type Tasks = Vec<JoinHandle<Result<()>>>;

/// Starts following `modem_service` and kicking its stuck modems. Everything
/// winds down once `shutdown` is cancelled.
#[bon::builder(finish_fn = run)]
pub async fn program(
    config: Config,
    modem_service: impl ModemService,
    shutdown: CancellationToken,
) -> Result<Tasks> {
    info!("modem-kick starting with {config:?}");

    let (daemon, events) = Daemon::new(config, shutdown.clone());
    let supervisor = ServiceSupervisor::new(modem_service, events).spawn(shutdown);

    Ok(vec![supervisor, task::spawn(daemon.run())])
}
