//! Connection settings of a launched server.
//!
//! Derived by re-reading the configuration file after the customizer pipeline
//! ran, so injected ephemeral ports are reflected instead of the literal `0`
//! placeholders the staged file started with.

use std::{fs, net::IpAddr, path::PathBuf};

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::{error::BoxError, version::Version, workdir::WorkingDirectory};

const DEFAULT_NATIVE_TRANSPORT_PORT: u16 = 9042;
const DEFAULT_RPC_PORT: u16 = 9160;
const DEFAULT_STORAGE_PORT: u16 = 7000;
const DEFAULT_SSL_STORAGE_PORT: u16 = 7001;

/// Facts a client needs to connect to the running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    address: IpAddr,
    port: u16,
    ssl_port: Option<u16>,
    rpc_port: u16,
    storage_port: u16,
    ssl_storage_port: u16,
    version: Version,
    working_directory: PathBuf,
}

impl Settings {
    /// Address the server listens on.
    #[must_use]
    pub const fn address(&self) -> IpAddr { self.address }

    /// Native transport (CQL) port.
    #[must_use]
    pub const fn port(&self) -> u16 { self.port }

    /// SSL native transport port, when configured.
    #[must_use]
    pub const fn ssl_port(&self) -> Option<u16> { self.ssl_port }

    /// Thrift RPC port.
    #[must_use]
    pub const fn rpc_port(&self) -> u16 { self.rpc_port }

    /// Inter-node storage port.
    #[must_use]
    pub const fn storage_port(&self) -> u16 { self.storage_port }

    /// Inter-node SSL storage port.
    #[must_use]
    pub const fn ssl_storage_port(&self) -> u16 { self.ssl_storage_port }

    /// Version of the launched server.
    #[must_use]
    pub const fn version(&self) -> Version { self.version }

    /// Root of the working directory this launch ran from.
    #[must_use]
    pub const fn working_directory(&self) -> &PathBuf { &self.working_directory }

    /// Reads settings back out of the (possibly rewritten) configuration
    /// file.
    pub(crate) fn from_working_directory(
        directory: &WorkingDirectory,
        version: Version,
        address: IpAddr,
    ) -> Result<Self, BoxError> {
        let text = fs::read_to_string(directory.config_file())?;
        let mapping: Mapping = if text.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str(&text)?
        };
        Ok(Self {
            address,
            port: port_value(&mapping, "native_transport_port")
                .unwrap_or(DEFAULT_NATIVE_TRANSPORT_PORT),
            ssl_port: port_value(&mapping, "native_transport_port_ssl"),
            rpc_port: port_value(&mapping, "rpc_port").unwrap_or(DEFAULT_RPC_PORT),
            storage_port: port_value(&mapping, "storage_port").unwrap_or(DEFAULT_STORAGE_PORT),
            ssl_storage_port: port_value(&mapping, "ssl_storage_port")
                .unwrap_or(DEFAULT_SSL_STORAGE_PORT),
            version,
            working_directory: directory.root().to_path_buf(),
        })
    }
}

/// Reads a port-valued key, tolerating both numeric and quoted forms.
pub(crate) fn port_value(mapping: &Mapping, key: &str) -> Option<u16> {
    let key_value = Value::String(key.to_owned());
    let value = mapping.get(&key_value)?;
    let number = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }?;
    u16::try_from(number).ok()
}
