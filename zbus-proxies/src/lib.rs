#![forbid(unsafe_code)]

#[cfg(feature = "modem_manager1")]
pub mod modem_manager1;
