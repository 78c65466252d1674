//! `ModemManagerService` against a fake ModemManager on a private bus.

use color_eyre::Result;
use dbus_launch::BusType;
use futures::{Stream, StreamExt as _};
use orb_modem_kick::{
    modem::{ModemControl as _, ModemPath},
    modem_manager::ModemManagerService,
    registration::RegistrationState,
    ModemService as _, ObjectEvent, Presence, ServiceClient as _,
};
use orb_zbus_proxies::modem_manager1::{OBJECT_PATH, WELL_KNOWN_NAME};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{task, time};
use zbus::{fdo, interface, Connection, ConnectionBuilder};

const MODEM_0: &str = "/org/freedesktop/ModemManager1/Modem/0";
const MODEM_1: &str = "/org/freedesktop/ModemManager1/Modem/1";
const BEARER_0: &str = "/org/freedesktop/ModemManager1/Bearer/0";

type Calls = Arc<Mutex<Vec<String>>>;

struct FakeModem {
    calls: Calls,
}

#[interface(name = "org.freedesktop.ModemManager1.Modem")]
impl FakeModem {
    async fn enable(&self, enable: bool) {
        self.calls.lock().unwrap().push(format!("Enable({enable})"));
    }

    async fn set_power_state(&self, state: u32) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("SetPowerState({state})"));
    }

    #[zbus(property)]
    async fn primary_port(&self) -> String {
        "cdc-wdm0".to_owned()
    }
}

struct FakeModem3gpp {
    registration_state: u32,
}

#[interface(name = "org.freedesktop.ModemManager1.Modem.Modem3gpp")]
impl FakeModem3gpp {
    #[zbus(property)]
    async fn registration_state(&self) -> u32 {
        self.registration_state
    }
}

struct Fixture {
    _dbusd: dbus_launch::Daemon,
    /// The fake ModemManager's side of the bus.
    modem_manager: Connection,
    calls: Calls,
    service: ModemManagerService,
}

impl Fixture {
    async fn new() -> Result<Self> {
        let dbusd = task::spawn_blocking(|| {
            dbus_launch::Launcher::daemon()
                .bus_type(BusType::Session)
                .launch()
        })
        .await??;

        let modem_manager = ConnectionBuilder::address(dbusd.address())?
            .serve_at(OBJECT_PATH, fdo::ObjectManager)?
            .build()
            .await?;
        let client = ConnectionBuilder::address(dbusd.address())?.build().await?;

        Ok(Self {
            _dbusd: dbusd,
            modem_manager,
            calls: Calls::default(),
            service: ModemManagerService::new(client),
        })
    }

    async fn own_name(&self) -> Result<()> {
        self.modem_manager.request_name(WELL_KNOWN_NAME).await?;
        Ok(())
    }

    async fn release_name(&self) -> Result<()> {
        self.modem_manager.release_name(WELL_KNOWN_NAME).await?;
        Ok(())
    }

    async fn export_modem(&self, path: &str, state: RegistrationState) -> Result<()> {
        self.export_bare_modem(path).await?;
        self.modem_manager
            .object_server()
            .at(
                path,
                FakeModem3gpp {
                    registration_state: state as u32,
                },
            )
            .await?;
        Ok(())
    }

    /// A modem without the 3GPP interface.
    async fn export_bare_modem(&self, path: &str) -> Result<()> {
        let modem = FakeModem {
            calls: self.calls.clone(),
        };
        self.modem_manager.object_server().at(path, modem).await?;
        Ok(())
    }

    async fn set_registration(&self, path: &str, state: RegistrationState) -> Result<()> {
        let iface = self
            .modem_manager
            .object_server()
            .interface::<_, FakeModem3gpp>(path)
            .await?;
        let mut modem = iface.get_mut().await;
        modem.registration_state = state as u32;
        modem
            .registration_state_changed(iface.signal_context())
            .await?;
        Ok(())
    }

    async fn announce_primary_port(&self, path: &str) -> Result<()> {
        let iface = self
            .modem_manager
            .object_server()
            .interface::<_, FakeModem>(path)
            .await?;
        iface
            .get()
            .await
            .primary_port_changed(iface.signal_context())
            .await?;
        Ok(())
    }
}

async fn next<T>(stream: &mut (impl Stream<Item = T> + Unpin)) -> T {
    time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for the next item")
        .expect("stream ended")
}

#[tokio::test]
async fn presence_follows_the_well_known_name() -> Result<()> {
    let fx = Fixture::new().await?;
    let mut presence = fx.service.presence().await?;
    assert_eq!(next(&mut presence).await, Presence::Absent);

    fx.own_name().await?;
    assert_eq!(next(&mut presence).await, Presence::Present);

    fx.release_name().await?;
    assert_eq!(next(&mut presence).await, Presence::Absent);

    Ok(())
}

#[tokio::test]
async fn presence_starts_from_the_current_owner() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.own_name().await?;

    let mut presence = fx.service.presence().await?;
    assert_eq!(next(&mut presence).await, Presence::Present);

    Ok(())
}

#[tokio::test]
async fn inventory_lists_modem_objects_only() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.own_name().await?;
    fx.export_modem(MODEM_0, RegistrationState::Idle).await?;
    fx.export_bare_modem(MODEM_1).await?;
    fx.modem_manager
        .object_server()
        .at(
            BEARER_0,
            FakeModem3gpp {
                registration_state: 0,
            },
        )
        .await?;

    let client = fx.service.connect().await?;
    let mut modems = client.inventory().await?;
    modems.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<_> = modems.iter().map(|m| m.path.clone()).collect();
    assert_eq!(paths, [ModemPath::from(MODEM_0), ModemPath::from(MODEM_1)]);

    let modem_0 = &modems[0];
    let port = modem_0.modem.as_ref().and_then(|m| m.primary_port.as_deref());
    assert_eq!(port, Some("cdc-wdm0"));
    let state = modem_0.modem_3gpp.as_ref().map(|m| m.registration_state);
    assert_eq!(state, Some(RegistrationState::Idle));

    let modem_1 = &modems[1];
    assert!(modem_1.modem.is_some());
    assert!(modem_1.modem_3gpp.is_none());

    let unknown = ModemPath::from("/org/freedesktop/ModemManager1/Modem/7");
    assert!(client.modem(&unknown).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn object_events_follow_exported_modems() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.own_name().await?;
    let client = fx.service.connect().await?;
    let mut events = client.object_events().await?;

    // not under the modem prefix, so never reported
    fx.modem_manager
        .object_server()
        .at(
            BEARER_0,
            FakeModem3gpp {
                registration_state: 0,
            },
        )
        .await?;
    fx.export_modem(MODEM_1, RegistrationState::Home).await?;

    // one InterfacesAdded per exported interface
    let added = ObjectEvent::Added(ModemPath::from(MODEM_1));
    assert_eq!(next(&mut events).await, added);
    assert_eq!(next(&mut events).await, added);

    fx.modem_manager
        .object_server()
        .remove::<FakeModem3gpp, _>(MODEM_1)
        .await?;
    assert_eq!(
        next(&mut events).await,
        ObjectEvent::Removed(ModemPath::from(MODEM_1))
    );

    Ok(())
}

#[tokio::test]
async fn back_to_back_registration_changes_all_arrive() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.own_name().await?;
    fx.export_modem(MODEM_0, RegistrationState::Idle).await?;

    let client = fx.service.connect().await?;
    let modem = client.modem(&ModemPath::from(MODEM_0)).await?.unwrap();
    let mut changes = modem.modem_3gpp.unwrap().registration_changes;

    // changes on the other interface are not registration changes
    fx.announce_primary_port(MODEM_0).await?;
    fx.set_registration(MODEM_0, RegistrationState::Home).await?;
    fx.set_registration(MODEM_0, RegistrationState::Idle).await?;

    assert_eq!(next(&mut changes).await, RegistrationState::Home);
    assert_eq!(next(&mut changes).await, RegistrationState::Idle);

    Ok(())
}

#[tokio::test]
async fn kick_calls_reach_the_modem() -> Result<()> {
    let fx = Fixture::new().await?;
    fx.own_name().await?;
    fx.export_modem(MODEM_0, RegistrationState::Denied).await?;

    let client = fx.service.connect().await?;
    let modem = client.modem(&ModemPath::from(MODEM_0)).await?.unwrap();
    let control = modem.modem.unwrap().control;

    control.disable().await?;
    control.set_power_state_low().await?;
    control.enable().await?;

    assert_eq!(
        *fx.calls.lock().unwrap(),
        ["Enable(false)", "SetPowerState(2)", "Enable(true)"]
    );

    Ok(())
}
