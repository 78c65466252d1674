//! ModemManager on the system bus.

use crate::{
    modem::{Modem3gppInterface, ModemControl, ModemInterface, ModemObject, ModemPath},
    registration::RegistrationState,
    supervisor::{ModemService, ObjectEvent, Presence, ServiceClient},
};
use async_trait::async_trait;
use color_eyre::{eyre::WrapErr as _, Result};
use futures::{
    future,
    stream::{self, BoxStream},
    StreamExt as _,
};
use orb_zbus_proxies::modem_manager1::{
    power_state, Modem3gppProxy, ModemProxy, MODEM_3GPP_INTERFACE, MODEM_INTERFACE,
    MODEM_PATH_PREFIX, OBJECT_PATH, WELL_KNOWN_NAME,
};
use std::sync::Arc;
use tracing::{debug, warn};
use zbus::{
    fdo::{DBusProxy, ObjectManagerProxy, PropertiesChanged, PropertiesProxy},
    names::BusName,
    proxy::CacheProperties,
    Connection,
};

pub struct ModemManagerService {
    conn: Connection,
}

impl ModemManagerService {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ModemService for ModemManagerService {
    async fn presence(&self) -> Result<BoxStream<'static, Presence>> {
        let dbus = DBusProxy::new(&self.conn)
            .await
            .wrap_err("failed to create org.freedesktop.DBus proxy object")?;
        // Subscribe first, so an owner change racing the initial query is not lost.
        let changes = dbus
            .receive_name_owner_changed()
            .await
            .wrap_err("failed to get NameOwnerChanged signal stream")?;
        let has_owner = dbus
            .name_has_owner(BusName::try_from(WELL_KNOWN_NAME)?)
            .await
            .wrap_err("failed to query the owner of ModemManager's name")?;

        let initial = if has_owner {
            Presence::Present
        } else {
            Presence::Absent
        };
        let changes = changes.filter_map(|signal| {
            let presence = match signal.args() {
                Ok(args) if args.name().as_str() == WELL_KNOWN_NAME => {
                    Some(if args.new_owner().is_some() {
                        Presence::Present
                    } else {
                        Presence::Absent
                    })
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("failed to extract NameOwnerChanged args: {e}");
                    None
                }
            };
            future::ready(presence)
        });

        Ok(stream::once(future::ready(initial)).chain(changes).boxed())
    }

    async fn connect(&self) -> Result<Box<dyn ServiceClient>> {
        let object_manager = ObjectManagerProxy::builder(&self.conn)
            .destination(WELL_KNOWN_NAME)?
            .path(OBJECT_PATH)?
            .build()
            .await
            .wrap_err("failed to create ObjectManager proxy")?;

        Ok(Box::new(ModemManagerClient {
            conn: self.conn.clone(),
            object_manager,
        }))
    }
}

struct ModemManagerClient {
    conn: Connection,
    object_manager: ObjectManagerProxy<'static>,
}

fn tracks(interface: &str) -> bool {
    interface == MODEM_INTERFACE || interface == MODEM_3GPP_INTERFACE
}

#[async_trait]
impl ServiceClient for ModemManagerClient {
    async fn object_events(&self) -> Result<BoxStream<'static, ObjectEvent>> {
        let added = self
            .object_manager
            .receive_interfaces_added()
            .await
            .wrap_err("failed to get InterfacesAdded signal stream")?
            .filter_map(|signal| {
                let event = signal.args().ok().and_then(|args| {
                    let path = args.object_path().as_str();
                    let relevant = path.starts_with(MODEM_PATH_PREFIX)
                        && args
                            .interfaces_and_properties()
                            .keys()
                            .any(|interface| tracks(interface));
                    relevant.then(|| ObjectEvent::Added(ModemPath::from(path)))
                });
                future::ready(event)
            });
        let removed = self
            .object_manager
            .receive_interfaces_removed()
            .await
            .wrap_err("failed to get InterfacesRemoved signal stream")?
            .filter_map(|signal| {
                let event = signal.args().ok().and_then(|args| {
                    let path = args.object_path().as_str();
                    let relevant = path.starts_with(MODEM_PATH_PREFIX)
                        && args
                            .interfaces()
                            .iter()
                            .any(|interface| tracks(interface));
                    relevant.then(|| ObjectEvent::Removed(ModemPath::from(path)))
                });
                future::ready(event)
            });

        Ok(stream::select(added, removed).boxed())
    }

    async fn inventory(&self) -> Result<Vec<ModemObject>> {
        let objects = self
            .object_manager
            .get_managed_objects()
            .await
            .wrap_err("GetManagedObjects failed")?;

        let mut modems = Vec::new();
        for (path, interfaces) in objects {
            if !path.as_str().starts_with(MODEM_PATH_PREFIX) {
                continue;
            }
            let has = |name: &str| interfaces.keys().any(|i| i.as_str() == name);
            let path = ModemPath::from(path.as_str());
            match self
                .lookup(&path, has(MODEM_INTERFACE), has(MODEM_3GPP_INTERFACE))
                .await
            {
                Ok(modem) => modems.push(modem),
                Err(e) => warn!("skipping modem: {e:?}"),
            }
        }

        Ok(modems)
    }

    async fn modem(&self, path: &ModemPath) -> Result<Option<ModemObject>> {
        let objects = self
            .object_manager
            .get_managed_objects()
            .await
            .wrap_err("GetManagedObjects failed")?;

        let Some(interfaces) = objects
            .iter()
            .find_map(|(p, interfaces)| (p.as_str() == path.as_str()).then_some(interfaces))
        else {
            return Ok(None);
        };
        let has = |name: &str| interfaces.keys().any(|i| i.as_str() == name);
        let modem = self
            .lookup(path, has(MODEM_INTERFACE), has(MODEM_3GPP_INTERFACE))
            .await?;

        Ok(Some(modem))
    }
}

impl ModemManagerClient {
    async fn lookup(
        &self,
        path: &ModemPath,
        has_modem: bool,
        has_modem_3gpp: bool,
    ) -> Result<ModemObject> {
        let modem = if has_modem {
            let proxy = ModemProxy::builder(&self.conn)
                .path(path.as_str().to_owned())?
                .build()
                .await
                .wrap_err_with(|| format!("{path}: failed to create modem proxy"))?;
            let primary_port = proxy
                .primary_port()
                .await
                .inspect_err(|e| debug!("{path}: failed to read PrimaryPort: {e}"))
                .ok();

            Some(ModemInterface {
                control: Arc::new(MmModem { proxy }),
                primary_port,
            })
        } else {
            None
        };

        let modem_3gpp = if has_modem_3gpp {
            // Subscribed before the state is read, so no change falls in between.
            let properties = PropertiesProxy::builder(&self.conn)
                .destination(WELL_KNOWN_NAME)?
                .path(path.as_str().to_owned())?
                .build()
                .await
                .wrap_err_with(|| format!("{path}: failed to create properties proxy"))?;
            let registration_changes = properties
                .receive_properties_changed()
                .await
                .wrap_err_with(|| {
                    format!("{path}: failed to get PropertiesChanged signal stream")
                })?
                .filter_map(|signal| future::ready(registration_change(&signal)))
                .boxed();
            let proxy = Modem3gppProxy::builder(&self.conn)
                .path(path.as_str().to_owned())?
                .cache_properties(CacheProperties::No)
                .build()
                .await
                .wrap_err_with(|| format!("{path}: failed to create 3GPP proxy"))?;
            let raw = proxy
                .registration_state()
                .await
                .wrap_err_with(|| format!("{path}: failed to read RegistrationState"))?;

            Some(Modem3gppInterface {
                registration_state: RegistrationState::from_raw(raw),
                registration_changes,
            })
        } else {
            None
        };

        Ok(ModemObject {
            path: path.clone(),
            modem,
            modem_3gpp,
        })
    }
}

fn registration_change(signal: &PropertiesChanged) -> Option<RegistrationState> {
    let args = signal
        .args()
        .inspect_err(|e| warn!("failed to extract PropertiesChanged args: {e}"))
        .ok()?;
    if args.interface_name().as_str() != MODEM_3GPP_INTERFACE {
        return None;
    }
    let value = args.changed_properties().get("RegistrationState")?;

    u32::try_from(value).ok().map(RegistrationState::from_raw)
}

struct MmModem {
    proxy: ModemProxy<'static>,
}

#[async_trait]
impl ModemControl for MmModem {
    async fn disable(&self) -> Result<()> {
        self.proxy.enable(false).await.wrap_err("Enable(false) failed")
    }

    async fn set_power_state_low(&self) -> Result<()> {
        self.proxy
            .set_power_state(power_state::LOW)
            .await
            .wrap_err("SetPowerState(low) failed")
    }

    async fn enable(&self) -> Result<()> {
        self.proxy.enable(true).await.wrap_err("Enable(true) failed")
    }
}
