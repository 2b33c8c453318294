//! Injects ephemeral ports into the staged configuration file.
//!
//! A literal `0` against one of the known port keys means "assign an
//! ephemeral port". All keys processed in one application share a single
//! [`PortAllocator`], so the injected values are guaranteed distinct; the
//! file is rewritten only when at least one value actually changed.

use std::{fs, net::IpAddr};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::WorkingDirectoryCustomizer;
use crate::{
    error::BoxError, ports::PortAllocator, version::Version, workdir::WorkingDirectory,
};

/// Port-valued keys recognised in `cassandra.yaml`.
const PORT_KEYS: [&str; 5] = [
    "native_transport_port",
    "native_transport_port_ssl",
    "rpc_port",
    "storage_port",
    "ssl_storage_port",
];

/// Replaces `0` port placeholders in `conf/cassandra.yaml` with freshly
/// allocated ephemeral ports.
///
/// Untouched keys keep their values and their order. Safe to re-run: a
/// rewritten file contains no `0` placeholders, so a second application finds
/// nothing to replace.
#[derive(Debug, Clone)]
pub struct RandomPortCustomizer {
    address: IpAddr,
}

impl RandomPortCustomizer {
    /// Probes for free ports on `address`.
    #[must_use]
    pub const fn new(address: IpAddr) -> Self { Self { address } }

    /// Probes for free ports on the local host.
    #[must_use]
    pub fn localhost() -> Self { Self::new(PortAllocator::localhost().address()) }
}

impl WorkingDirectoryCustomizer for RandomPortCustomizer {
    fn name(&self) -> &'static str { "random ports" }

    fn customize(&self, directory: &WorkingDirectory, _version: &Version) -> Result<(), BoxError> {
        let file = directory.config_file();
        let text = fs::read_to_string(&file)?;
        let mut mapping: Mapping = if text.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str(&text)?
        };

        let mut allocator = PortAllocator::new(self.address);
        let mut replaced = false;
        for key in PORT_KEYS {
            let entry = Value::String(key.to_owned());
            if mapping.get(&entry).is_some_and(wants_assignment) {
                let port = allocator.next()?;
                debug!(key, port, "injecting ephemeral port");
                mapping.insert(entry, Value::Number(port.into()));
                replaced = true;
            }
        }

        if replaced {
            fs::write(&file, serde_yaml::to_string(&mapping)?)?;
        }
        Ok(())
    }
}

/// Returns `true` for the literal `0` placeholder, numeric or quoted.
fn wants_assignment(value: &Value) -> bool {
    match value {
        Value::Number(number) => number.as_u64() == Some(0),
        Value::String(text) => text.trim() == "0",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::RandomPortCustomizer;
    use crate::{
        customizer::WorkingDirectoryCustomizer,
        settings::port_value,
        version::Version,
        workdir::WorkingDirectory,
    };

    fn staged_config(yaml: &str) -> (TempDir, WorkingDirectory) {
        let temp = TempDir::new().unwrap();
        let dir = WorkingDirectory::new(temp.path());
        fs::create_dir_all(temp.path().join("conf")).unwrap();
        fs::write(dir.config_file(), yaml).unwrap();
        (temp, dir)
    }

    fn read_mapping(dir: &WorkingDirectory) -> serde_yaml::Mapping {
        serde_yaml::from_str(&fs::read_to_string(dir.config_file()).unwrap()).unwrap()
    }

    #[test]
    fn replaces_only_zero_placeholders() {
        let (_temp, dir) = staged_config(
            "cluster_name: Test Cluster\nnative_transport_port: 0\nrpc_port: 9160\n",
        );
        RandomPortCustomizer::localhost()
            .customize(&dir, &Version::new(3, 11, 3))
            .unwrap();

        let mapping = read_mapping(&dir);
        let native = port_value(&mapping, "native_transport_port").unwrap();
        assert_ne!(native, 0);
        assert_eq!(port_value(&mapping, "rpc_port"), Some(9160));
        assert_eq!(
            mapping
                .get(&serde_yaml::Value::String("cluster_name".to_owned()))
                .and_then(serde_yaml::Value::as_str),
            Some("Test Cluster")
        );
    }

    #[test]
    fn injected_ports_are_distinct() {
        let (_temp, dir) = staged_config(
            "native_transport_port: 0\nstorage_port: 0\nssl_storage_port: 0\n",
        );
        RandomPortCustomizer::localhost()
            .customize(&dir, &Version::new(3, 11, 3))
            .unwrap();

        let mapping = read_mapping(&dir);
        let ports = [
            port_value(&mapping, "native_transport_port").unwrap(),
            port_value(&mapping, "storage_port").unwrap(),
            port_value(&mapping, "ssl_storage_port").unwrap(),
        ];
        assert!(ports.iter().all(|port| *port > 0));
        let unique: std::collections::HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), ports.len());
    }

    #[test]
    fn file_untouched_when_nothing_requested_assignment() {
        let original = "# hand-tuned\nrpc_port: 9160\nstorage_port: 7000\n";
        let (_temp, dir) = staged_config(original);
        RandomPortCustomizer::localhost()
            .customize(&dir, &Version::new(3, 11, 3))
            .unwrap();
        assert_eq!(fs::read_to_string(dir.config_file()).unwrap(), original);
    }

    #[test]
    fn quoted_zero_counts_as_a_placeholder() {
        let (_temp, dir) = staged_config("native_transport_port: \"0\"\n");
        RandomPortCustomizer::localhost()
            .customize(&dir, &Version::new(3, 11, 3))
            .unwrap();
        let mapping = read_mapping(&dir);
        assert_ne!(port_value(&mapping, "native_transport_port").unwrap(), 0);
    }

    #[test]
    fn key_order_survives_a_rewrite() {
        let (_temp, dir) = staged_config(
            "cluster_name: Test Cluster\nnative_transport_port: 0\nrpc_port: 9160\n",
        );
        RandomPortCustomizer::localhost()
            .customize(&dir, &Version::new(3, 11, 3))
            .unwrap();

        let keys: Vec<String> = read_mapping(&dir)
            .keys()
            .filter_map(|key| key.as_str().map(str::to_owned))
            .collect();
        assert_eq!(keys, ["cluster_name", "native_transport_port", "rpc_port"]);
    }
}
