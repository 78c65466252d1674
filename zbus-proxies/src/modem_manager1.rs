//! Proxies for the subset of `org.freedesktop.ModemManager1` we talk to.
//!
//! Modem objects live under [`MODEM_PATH_PREFIX`] and are enumerated through the
//! `org.freedesktop.DBus.ObjectManager` interface exported at [`OBJECT_PATH`], so
//! none of the per-modem proxies carry a default path.

use zbus::proxy;

pub const WELL_KNOWN_NAME: &str = "org.freedesktop.ModemManager1";
pub const OBJECT_PATH: &str = "/org/freedesktop/ModemManager1";
pub const MODEM_PATH_PREFIX: &str = "/org/freedesktop/ModemManager1/Modem/";

pub const MODEM_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem";
pub const MODEM_3GPP_INTERFACE: &str = "org.freedesktop.ModemManager1.Modem.Modem3gpp";

/// `MMModemPowerState`
pub mod power_state {
    pub const UNKNOWN: u32 = 0;
    pub const OFF: u32 = 1;
    pub const LOW: u32 = 2;
    pub const ON: u32 = 3;
}

#[proxy(
    interface = "org.freedesktop.ModemManager1.Modem",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Modem {
    /// Enable method
    fn enable(&self, enable: bool) -> zbus::Result<()>;

    /// SetPowerState method
    fn set_power_state(&self, state: u32) -> zbus::Result<()>;

    /// PrimaryPort property
    #[zbus(property)]
    fn primary_port(&self) -> zbus::Result<String>;
}

#[proxy(
    interface = "org.freedesktop.ModemManager1.Modem.Modem3gpp",
    default_service = "org.freedesktop.ModemManager1"
)]
pub trait Modem3gpp {
    /// RegistrationState property
    #[zbus(property)]
    fn registration_state(&self) -> zbus::Result<u32>;
}
