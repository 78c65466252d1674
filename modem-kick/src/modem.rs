//! What the daemon knows about a single modem object exported by ModemManager.

use crate::registration::RegistrationState;
use async_trait::async_trait;
use color_eyre::Result;
use futures::stream::BoxStream;
use std::{fmt, sync::Arc};

/// D-Bus object path of a modem, e.g. `/org/freedesktop/ModemManager1/Modem/0`.
///
/// Stable for as long as ModemManager keeps the modem exported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModemPath(String);

impl ModemPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ModemPath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ModemPath {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ModemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The calls a kick is made of. Each one resolves once ModemManager replied.
#[async_trait]
pub trait ModemControl: Send + Sync + 'static {
    async fn disable(&self) -> Result<()>;

    async fn set_power_state_low(&self) -> Result<()>;

    async fn enable(&self) -> Result<()>;
}

/// `org.freedesktop.ModemManager1.Modem`
pub struct ModemInterface {
    pub control: Arc<dyn ModemControl>,
    pub primary_port: Option<String>,
}

/// `org.freedesktop.ModemManager1.Modem.Modem3gpp`
pub struct Modem3gppInterface {
    /// Registration state at the time the object was looked up.
    pub registration_state: RegistrationState,
    /// Every later change of the registration state, in emission order.
    pub registration_changes: BoxStream<'static, RegistrationState>,
}

/// A modem object as discovered on the bus, with whichever of the interfaces we
/// care about it exported.
pub struct ModemObject {
    pub path: ModemPath,
    pub modem: Option<ModemInterface>,
    pub modem_3gpp: Option<Modem3gppInterface>,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures::{channel::mpsc, StreamExt as _};

    mockall::mock! {
        pub Control {}
        #[async_trait]
        impl ModemControl for Control {
            async fn disable(&self) -> Result<()>;

            async fn set_power_state_low(&self) -> Result<()>;

            async fn enable(&self) -> Result<()>;
        }
    }

    pub type RegistrationFeed = mpsc::UnboundedSender<RegistrationState>;

    /// A fully capable 3GPP modem whose registration changes are pushed through
    /// the returned feed.
    pub fn modem_object(
        path: &str,
        state: RegistrationState,
        control: impl ModemControl,
    ) -> (ModemObject, RegistrationFeed) {
        let (feed, changes) = mpsc::unbounded();
        let object = ModemObject {
            path: ModemPath::from(path),
            modem: Some(ModemInterface {
                control: Arc::new(control),
                primary_port: Some(String::from("cdc-wdm0")),
            }),
            modem_3gpp: Some(Modem3gppInterface {
                registration_state: state,
                registration_changes: changes.boxed(),
            }),
        };

        (object, feed)
    }
}
