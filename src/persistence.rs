//! Persistence Shim: the two JSON documents (`Modules.json`, `Devices.json`)
//! that let the gateway resume without re-enumerating every module's ports
//! after a restart. Both are keyed by the decimal string form of the
//! relevant integer ID, matching the original daemon's `json.dump(d,
//! default=str)` style snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Device, HaOpts, OptionValue, PortOpt, PortType, ValueHa};
use crate::error::PersistError;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModuleSnapshot {
    module_type: Option<String>,
    firmware_version: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DeviceSnapshot {
    port_type: PortType,
    port_opt: PortOpt,
    port_name: String,
    options: BTreeMap<String, OptionValue>,
    ha: HaOpts,
    value: f64,
    value_ha: ValueHa,
    counter_value: u32,
    energy_kwh: f64,
}

impl DeviceSnapshot {
    fn from_device(d: &Device) -> Self {
        DeviceSnapshot {
            port_type: d.port_type,
            port_opt: d.port_opt,
            port_name: d.port_name.clone(),
            options: d.options.clone(),
            ha: d.ha.clone(),
            value: d.value,
            value_ha: d.value_ha.clone(),
            counter_value: d.counter_value,
            energy_kwh: d.energy_kwh,
        }
    }

    fn into_device(self, device_id: u64) -> Device {
        let mut d = Device::new(device_id, self.port_type, self.port_opt, self.port_name, self.options, self.ha);
        d.value = self.value;
        d.value_ha = self.value_ha;
        d.counter_value = self.counter_value;
        d.energy_kwh = self.energy_kwh;
        d
    }
}

/// Bookkeeping the Protocol Engine keeps per module, restored verbatim so a
/// restart doesn't force a fresh version query before resuming scheduling.
pub struct ModuleRecord {
    pub module_type: Option<String>,
    pub firmware_version: Option<String>,
}

pub struct Store {
    modules_path: PathBuf,
    devices_path: PathBuf,
}

impl Store {
    pub fn new(data_dir: &Path) -> Self {
        Store { modules_path: data_dir.join("Modules.json"), devices_path: data_dir.join("Devices.json") }
    }

    /// Loads both documents. A missing or unreadable file yields an empty
    /// map rather than an error — a first run has neither file yet.
    pub fn load(&self) -> (BTreeMap<u32, ModuleRecord>, Catalog) {
        let modules = self.load_modules().unwrap_or_default();
        let devices = self.load_devices().unwrap_or_default();
        let mut catalog = Catalog::new();
        for (id, snapshot) in devices {
            catalog.insert(snapshot.into_device(id));
        }
        (modules, catalog)
    }

    fn load_modules(&self) -> Option<BTreeMap<u32, ModuleRecord>> {
        let text = std::fs::read_to_string(&self.modules_path).ok()?;
        let raw: BTreeMap<String, ModuleSnapshot> = serde_json::from_str(&text).ok()?;
        Some(
            raw.into_iter()
                .filter_map(|(k, v)| k.parse().ok().map(|id| (id, ModuleRecord { module_type: v.module_type, firmware_version: v.firmware_version })))
                .collect(),
        )
    }

    fn load_devices(&self) -> Option<BTreeMap<u64, DeviceSnapshot>> {
        let text = std::fs::read_to_string(&self.devices_path).ok()?;
        let raw: BTreeMap<String, DeviceSnapshot> = serde_json::from_str(&text).ok()?;
        Some(raw.into_iter().filter_map(|(k, v)| k.parse().ok().map(|id| (id, v))).collect())
    }

    /// Writes both documents back, called on clean termination.
    pub fn save(&self, modules: &BTreeMap<u32, ModuleRecord>, catalog: &Catalog) -> Result<(), PersistError> {
        let module_map: BTreeMap<String, ModuleSnapshot> = modules
            .iter()
            .map(|(id, m)| (id.to_string(), ModuleSnapshot { module_type: m.module_type.clone(), firmware_version: m.firmware_version.clone() }))
            .collect();
        let device_map: BTreeMap<String, DeviceSnapshot> = catalog.iter().map(|(id, d)| (id.to_string(), DeviceSnapshot::from_device(d))).collect();

        write_json(&self.modules_path, &module_map)?;
        write_json(&self.devices_path, &device_map)?;
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).map_err(|source| PersistError::Write { path: path.display().to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn missing_files_yield_empty_state_not_an_error() {
        let store = Store::new(Path::new("/nonexistent/dombus-gateway-test-dir"));
        let (modules, catalog) = store.load();
        assert!(modules.is_empty());
        assert!(catalog.is_empty());
    }

    #[test]
    fn round_trips_a_device_through_json() {
        let dir = std::env::temp_dir().join(format!("dombus-persist-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = Store::new(&dir);

        let mut catalog = Catalog::new();
        let mut d = Device::new(42, PortType::OutRelay, PortOpt::None, "RL1".into(), Map::new(), HaOpts::default());
        d.set_raw(1);
        catalog.insert(d);
        let modules = Map::new();
        store.save(&modules, &catalog).expect("save succeeds");

        let (_loaded_modules, loaded_catalog) = store.load();
        let restored = loaded_catalog.get(42).expect("device restored");
        assert_eq!(restored.value, 1.0);
        assert_eq!(restored.port_name, "RL1");

        std::fs::remove_dir_all(&dir).ok();
    }
}
