//! Follows ModemManager coming and going on the bus.
//!
//! Every time the service appears, whatever was tracked before is dropped, a
//! fresh client is built and the current inventory of modems is replayed into
//! the daemon. When the service vanishes the client is dropped along with every
//! tracked modem.

use crate::{
    daemon::{Event, EventSender},
    modem::{ModemObject, ModemPath},
};
use async_trait::async_trait;
use color_eyre::{eyre::WrapErr as _, Result};
use futures::{
    stream::{BoxStream, Fuse},
    StreamExt as _,
};
use std::{future, ops::ControlFlow, time::Duration};
use tokio::{
    task::{self, JoinHandle},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait before watching presence again after failing to.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    /// A modem object was exported, or gained one of the interfaces we track.
    Added(ModemPath),
    /// A modem object went away, or lost one of the interfaces we track.
    Removed(ModemPath),
}

/// The modem management service, as seen from outside.
#[async_trait]
pub trait ModemService: Send + Sync + 'static {
    /// Yields the current presence of the service first, then every change.
    async fn presence(&self) -> Result<BoxStream<'static, Presence>>;

    /// Builds a client for the instance of the service currently on the bus.
    async fn connect(&self) -> Result<Box<dyn ServiceClient>>;
}

/// A client bound to one instance of the service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn object_events(&self) -> Result<BoxStream<'static, ObjectEvent>>;

    /// Every modem currently exported.
    async fn inventory(&self) -> Result<Vec<ModemObject>>;

    /// Looks up a single modem. `None` if it is not exported (anymore).
    async fn modem(&self, path: &ModemPath) -> Result<Option<ModemObject>>;
}

struct Session {
    client: Box<dyn ServiceClient>,
    object_events: Fuse<BoxStream<'static, ObjectEvent>>,
}

pub struct ServiceSupervisor<S> {
    service: S,
    events: EventSender,
}

impl<S: ModemService> ServiceSupervisor<S> {
    pub fn new(service: S, events: EventSender) -> Self {
        Self { service, events }
    }

    /// Follows presence changes in the background until `shutdown` is
    /// cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        task::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut session: Option<Session> = None;

        loop {
            let presence = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                presence = self.watch_presence() => presence,
            };
            if self.follow(presence, &mut session, &shutdown).await.is_break() {
                break;
            }
            // The session outlives the stream; the next subscription reports
            // the current presence first and settles it.
            warn!("ModemManager presence stream ended; watching again");
        }

        Ok(())
    }

    async fn watch_presence(&self) -> BoxStream<'static, Presence> {
        loop {
            match self.service.presence().await {
                Ok(presence) => return presence,
                Err(e) => warn!(
                    "failed to watch ModemManager presence: {e:?}; retrying in {}s",
                    RESUBSCRIBE_DELAY.as_secs()
                ),
            }
            time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// Breaks on shutdown, continues once `presence` ends.
    async fn follow(
        &self,
        mut presence: BoxStream<'static, Presence>,
        session: &mut Option<Session>,
        shutdown: &CancellationToken,
    ) -> ControlFlow<()> {
        loop {
            let object_event = async {
                match session.as_mut() {
                    Some(session) => session.object_events.next().await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return ControlFlow::Break(()),
                change = presence.next() => match change {
                    Some(Presence::Present) => {
                        info!("ModemManager appeared");
                        drop(session.take());
                        self.send(Event::ServiceAppeared);
                        match self.open_session().await {
                            Ok(opened) => {
                                self.replay_inventory(&*opened.client).await;
                                *session = Some(opened);
                            }
                            Err(e) => warn!("{e:?}; waiting for ModemManager to reappear"),
                        }
                    }
                    Some(Presence::Absent) => {
                        info!("ModemManager vanished");
                        drop(session.take());
                        self.send(Event::ServiceVanished);
                    }
                    None => return ControlFlow::Continue(()),
                },
                Some(event) = object_event => {
                    let client = session.as_ref().map(|session| &*session.client);
                    if let Some(client) = client {
                        self.on_object_event(client, event).await;
                    }
                }
            }
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let client = self
            .service
            .connect()
            .await
            .wrap_err("failed to create ModemManager client")?;
        // Subscribe before listing, so nothing exported in between is missed.
        let object_events = client
            .object_events()
            .await
            .wrap_err("failed to subscribe to modem objects")?
            .fuse();

        Ok(Session {
            client,
            object_events,
        })
    }

    /// A failed listing leaves the session in place; modems announced later
    /// are still picked up.
    async fn replay_inventory(&self, client: &dyn ServiceClient) {
        let modems = match client.inventory().await {
            Ok(modems) => modems,
            Err(e) => {
                warn!("failed to list modems: {e:?}");
                return;
            }
        };

        info!("found {} modems", modems.len());
        for modem in modems {
            self.send(Event::ModemAdded(modem));
        }
    }

    async fn on_object_event(&self, client: &dyn ServiceClient, event: ObjectEvent) {
        match event {
            ObjectEvent::Added(path) => match client.modem(&path).await {
                Ok(Some(modem)) => self.send(Event::ModemAdded(modem)),
                Ok(None) => debug!("{path}: gone before it could be looked up"),
                Err(e) => warn!("{path}: failed to look up modem: {e:?}"),
            },
            ObjectEvent::Removed(path) => self.send(Event::ModemRemoved(path)),
        }
    }

    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("daemon is gone; dropping event");
        }
    }
}
