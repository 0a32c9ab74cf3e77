//! Publisher: topic shapes, discovery payload construction and the single
//! publish worker that drains an unbounded queue onto the broker at QoS 1.

use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::catalog::{Catalog, Device, ValueHa};
use crate::config::MqttConfig;
use crate::registry::device_id_name;

/// The tag stamped into every payload this gateway publishes, so its own
/// subscription loop can recognise and discard its own echoes.
const SENDER_TAG: &str = "dombusgateway";

/// `<base>/<platform>/<id>`
pub fn state_topic(base: &str, platform: &str, dev_id_name: &str) -> String {
    format!("{base}/{platform}/{dev_id_name}")
}

/// `<base>/<platform>/<id>/set`
pub fn command_topic(base: &str, platform: &str, dev_id_name: &str) -> String {
    format!("{base}/{platform}/{dev_id_name}/set")
}

/// `<configBase>/<platform>/<id>/config`
pub fn config_topic(config_base: &str, platform: &str, dev_id_name: &str) -> String {
    format!("{config_base}/{platform}/{dev_id_name}/config")
}

/// Whether an inbound message should be ignored by the subscriber: either it
/// carries our own loopback tag, or it arrived on a state topic (which this
/// gateway never subscribes commands on).
pub fn is_loopback(topic: &str, payload: &[u8]) -> bool {
    if topic.ends_with("/state") {
        return true;
    }
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(v) => v.get("_sender").and_then(|s| s.as_str()) == Some(SENDER_TAG),
        Err(_) => false,
    }
}

#[derive(Serialize)]
struct Originator {
    name: &'static str,
    sw: &'static str,
    url: &'static str,
}

#[derive(Serialize)]
struct DeviceRecord {
    identifiers: [u32; 1],
    name: String,
    mf: &'static str,
    mdl: Option<String>,
    sw: Option<String>,
}

/// Builds the Home-Assistant-style discovery payload for one device.
/// `topic_base` must match the base `publish_due`/`publish_state` use for
/// this device's state, or the discovered entity points at a topic the
/// gateway never writes to.
pub fn discovery_payload(device: &Device, frame_addr: u32, topic_base: &str, module_type: Option<&str>, firmware_version: Option<&str>) -> serde_json::Value {
    let dev_id_name = device_id_name(device.device_id);
    let unique_id = format!("dombus_{dev_id_name}");
    let mut payload = json!({
        "name": device.port_name,
        "unique_id": unique_id,
        "command_topic": command_topic(topic_base, device.ha.platform(), &dev_id_name),
        "state_topic": state_topic(topic_base, device.ha.platform(), &dev_id_name),
        "schema": "json",
        "_sender": SENDER_TAG,
        "origin": Originator { name: "DomBusGateway", sw: env!("CARGO_PKG_VERSION"), url: "https://github.com/CreasolTech/DomBusGateway" },
        "device": DeviceRecord {
            identifiers: [frame_addr],
            name: format!("DomBus {frame_addr:06x}"),
            mf: "Creasol",
            mdl: module_type.map(str::to_owned),
            sw: firmware_version.map(str::to_owned),
        },
    });
    if let serde_json::Value::Object(ref mut map) = payload {
        if let Some(device_class) = &device.ha.device_class {
            map.insert("device_class".into(), json!(device_class));
        }
        if let Some(unit) = &device.ha.unit {
            map.insert("unit_of_measurement".into(), json!(unit));
        }
        if let Some(min) = device.ha.min {
            map.insert("min".into(), json!(min));
        }
        if let Some(max) = device.ha.max {
            map.insert("max".into(), json!(max));
        }
        if let Some(step) = device.ha.step {
            map.insert("step".into(), json!(step));
        }
        if let Some(icon) = &device.ha.icon {
            map.insert("icon".into(), json!(icon));
        }
        if let Some(options) = &device.ha.options {
            map.insert("options".into(), json!(options));
        }
        for (k, v) in &device.ha.extra {
            map.insert(k.clone(), v.clone());
        }
    }
    payload
}

fn state_payload(value_ha: &ValueHa) -> serde_json::Value {
    match value_ha {
        ValueHa::Text(s) => json!({"value": s, "_sender": SENDER_TAG}),
        ValueHa::Number(n) => json!({"value": n, "_sender": SENDER_TAG}),
    }
}

/// One item on the publish work list.
pub enum PublishJob {
    Discovery { topic: String, payload: serde_json::Value },
    /// An empty payload retires a previously-published entity.
    Retire { topic: String },
    State { topic: String, value_ha: ValueHa },
}

#[derive(Clone)]
pub struct PublishHandle {
    tx: mpsc::UnboundedSender<PublishJob>,
}

impl PublishHandle {
    pub fn send(&self, job: PublishJob) {
        // The worker only stops when the gateway itself is shutting down, at
        // which point dropped jobs are harmless; ignore the send error.
        let _ = self.tx.send(job);
    }

    pub fn publish_state(&self, topic: String, value_ha: ValueHa) {
        self.send(PublishJob::State { topic, value_ha });
    }

    pub fn publish_discovery(&self, topic: String, payload: serde_json::Value) {
        self.send(PublishJob::Discovery { topic, payload });
    }

    pub fn retire(&self, topic: String) {
        self.send(PublishJob::Retire { topic });
    }
}

/// Builds the MQTT client and spawns the single publish worker, returning a
/// cheaply-cloneable handle plus the eventloop driver the caller must poll
/// (typically via `spawn_local` alongside the per-bus tasks).
pub fn spawn(cfg: &MqttConfig, client_id: &str) -> (PublishHandle, AsyncClient, rumqttc::EventLoop) {
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(30));
    if let (Some(user), Some(password)) = (&cfg.user, &cfg.password) {
        opts.set_credentials(user.clone(), password.clone());
    }
    let (client, eventloop) = AsyncClient::new(opts, 64);
    let (tx, mut rx) = mpsc::unbounded_channel::<PublishJob>();
    let worker_client = client.clone();
    tokio::task::spawn_local(async move {
        while let Some(job) = rx.recv().await {
            let (topic, payload) = match job {
                PublishJob::Discovery { topic, payload } => (topic, serde_json::to_vec(&payload).unwrap_or_default()),
                PublishJob::Retire { topic } => (topic, Vec::new()),
                PublishJob::State { topic, value_ha } => (topic, serde_json::to_vec(&state_payload(&value_ha)).unwrap_or_default()),
            };
            if let Err(err) = worker_client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                log::warn!("publish to {topic} failed: {err}");
            }
        }
    });
    (PublishHandle { tx }, client, eventloop)
}

/// Publishes state for every due device in `catalog`, per the
/// change-based-plus-heartbeat policy. Intended to run once per scheduler
/// tick; discovery (config-topic) publication happens separately, when a
/// device is first materialised or its port type changes.
pub fn publish_due(handle: &PublishHandle, catalog: &mut Catalog, cfg: &MqttConfig) {
    let now = std::time::Instant::now();
    let interval = Duration::from_secs(cfg.publish_interval_secs);
    let ids: Vec<u64> = catalog.iter().map(|(id, _)| *id).collect();
    for id in ids {
        let Some(device) = catalog.get_mut(id) else { continue };
        if device.due_for_publish(now, interval) {
            let dev_id_name = device_id_name(id);
            handle.publish_state(state_topic(&cfg.topic, device.ha.platform(), &dev_id_name), device.value_ha.clone());
            device.mark_published(now);
        }
        if device.has_auxiliary() && device.due_for_energy_publish(now, interval) {
            let aux_name = device_id_name(crate::catalog::aux_device_id(id));
            handle.publish_state(state_topic(&cfg.topic, device.ha.platform(), &aux_name), ValueHa::Number(device.energy_kwh));
            device.mark_energy_published(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Device, HaOpts, PortOpt, PortType};
    use std::collections::BTreeMap;

    #[test]
    fn topic_shapes_match_the_base_platform_id_pattern() {
        assert_eq!(state_topic("dombus", "switch", "000001_0001"), "dombus/switch/000001_0001");
        assert_eq!(command_topic("dombus", "switch", "000001_0001"), "dombus/switch/000001_0001/set");
        assert_eq!(config_topic("homeassistant", "switch", "000001_0001"), "homeassistant/switch/000001_0001/config");
    }

    #[test]
    fn state_topic_suffix_is_always_a_loopback() {
        assert!(is_loopback("dombus/switch/000001_0001/state", b"{}"));
    }

    #[test]
    fn tagged_payload_is_a_loopback_regardless_of_topic() {
        let payload = serde_json::to_vec(&json!({"value": "ON", "_sender": SENDER_TAG})).unwrap();
        assert!(is_loopback("dombus/switch/000001_0001/set", &payload));
    }

    #[test]
    fn untagged_command_payload_is_not_a_loopback() {
        assert!(!is_loopback("dombus/switch/000001_0001/set", b"{\"value\":\"ON\"}"));
    }

    #[test]
    fn discovery_payload_carries_device_and_origin_records() {
        let frame_addr = 0x0101ff;
        let device_id = crate::registry::device_id(frame_addr, 7);
        let device = Device::new(device_id, PortType::OutRelay, PortOpt::None, "RL1".into(), BTreeMap::new(), HaOpts::default());
        let payload = discovery_payload(&device, frame_addr, "dombus", Some("DomBus31"), Some("01a1"));
        assert_eq!(payload["unique_id"], "dombus_0101ff_0007");
        assert_eq!(payload["device"]["mdl"], "DomBus31");
        assert_eq!(payload["_sender"], SENDER_TAG);
    }
}
