//! Top-level wiring: owns the shared Device Catalog, spawns one task per
//! bus plus the publisher and telnet admin listener, and drives the
//! change-based-plus-heartbeat publish tick.
//!
//! Everything here runs on a `tokio::task::LocalSet` on a current-thread
//! runtime: state is `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>` because,
//! per the concurrency model, exactly one task mutates the catalog at a
//! time and no cross-thread handoff ever happens.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;

use crate::admin::{self, Command, Session, SetportToken};
use crate::bus::{AdminOp, Bus, BusControl};
use crate::catalog::{Catalog, CatalogEvent};
use crate::config::Config;
use crate::persistence::{ModuleRecord, Store};
use crate::publisher::{self, PublishHandle};

pub struct Gateway {
    config: Config,
    catalog: Rc<RefCell<Catalog>>,
    store: Store,
    controls: Rc<RefCell<BTreeMap<u8, BusControl>>>,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        let store = Store::new(&config.data_dir);
        let (_modules, catalog) = store.load();
        Gateway { config, catalog: Rc::new(RefCell::new(catalog)), store, controls: Rc::new(RefCell::new(BTreeMap::new())) }
    }

    /// Spawns every task (per-bus drivers, MQTT publisher/eventloop, telnet
    /// listener, publish ticker) onto `local` and returns immediately; the
    /// caller is expected to keep `self` alive and drive `local` until
    /// shutdown, then call [`Gateway::save`].
    pub async fn run(&self, local: &LocalSet) -> anyhow::Result<()> {
        let (publish_handle, client, mut eventloop) = publisher::spawn(&self.config.mqtt, "dombus-gateway");
        local.spawn_local(async move {
            // The worker task inside `publisher::spawn` holds its own clone
            // of the client; this handle only needs to stay alive long
            // enough to keep the eventloop polling.
            let _client = client;
            loop {
                if let Err(err) = eventloop.poll().await {
                    log::warn!("mqtt eventloop error: {err}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });

        for (&bus_id, bus_cfg) in &self.config.buses {
            let (bus, control) = Bus::open(bus_id, bus_cfg)?;
            self.controls.borrow_mut().insert(bus_id, control);
            let catalog = self.catalog.clone();
            let publish_handle = publish_handle.clone();
            let topic = self.config.mqtt.topic.clone();
            let topic_config = self.config.mqtt.topic_config.clone();
            local.spawn_local(async move {
                let events_catalog = catalog.clone();
                let on_events = move |events: Vec<CatalogEvent>| {
                    dispatch_events(&events_catalog, &publish_handle, &topic, &topic_config, events);
                };
                if let Err(err) = bus.run(catalog, on_events).await {
                    log::error!("bus {bus_id:02x} terminated: {err}");
                }
            });
        }

        if self.config.telnet.enabled {
            let controls = self.controls.clone();
            let catalog = self.catalog.clone();
            let bind = format!("{}:{}", self.config.telnet.bind, self.config.telnet.port);
            // Binding is process-fatal per the error-handling design, so it
            // happens here (and is awaited) rather than inside the spawned
            // accept loop, where a failure would only be logged.
            let listener = TcpListener::bind(&bind)
                .await
                .map_err(|source| crate::error::GatewayError::AdminBind { addr: bind.clone(), source })?;
            log::info!("admin telnet listening on {bind}");
            local.spawn_local(async move {
                if let Err(err) = serve_telnet(listener, controls, catalog).await {
                    log::error!("telnet listener terminated: {err}");
                }
            });
        }

        let publish_interval = self.config.mqtt.publish_interval_secs;
        let catalog = self.catalog.clone();
        let publish_handle_tick = publish_handle;
        let mqtt_cfg = self.config.mqtt.clone();
        local.spawn_local(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs((publish_interval / 10).max(1)));
            loop {
                ticker.tick().await;
                let mut catalog = catalog.borrow_mut();
                publisher::publish_due(&publish_handle_tick, &mut catalog, &mqtt_cfg);
            }
        });

        Ok(())
    }

    /// Queries every live bus task for its modules' type/firmware-version
    /// bookkeeping, then writes both documents. Called once, on shutdown.
    pub async fn save(&self) -> Result<(), crate::error::PersistError> {
        let mut by_bus: BTreeMap<u8, std::collections::BTreeSet<u16>> = BTreeMap::new();
        for (&id, _) in self.catalog.borrow().iter() {
            let frame_addr = crate::registry::frame_addr_of_device(id);
            by_bus.entry(crate::registry::bus_id_of(frame_addr)).or_default().insert(crate::registry::module_addr_of(frame_addr));
        }

        let mut modules: BTreeMap<u32, ModuleRecord> = BTreeMap::new();
        for (bus_id, module_addrs) in by_bus {
            let Some(control) = self.controls.borrow().get(&bus_id).cloned() else { continue };
            for module_addr in module_addrs {
                let (tx, rx) = tokio::sync::oneshot::channel();
                if control.send(AdminOp::Describe { module_addr, reply: tx }).is_err() {
                    continue;
                }
                if let Ok(Some(desc)) = rx.await {
                    let frame_addr = crate::registry::frame_addr(bus_id, module_addr);
                    modules.insert(frame_addr, ModuleRecord { module_type: desc.module_type, firmware_version: desc.firmware_version });
                }
            }
        }

        self.store.save(&modules, &self.catalog.borrow())
    }
}

/// Reacts to the events a bus task's frame processing produced: a newly
/// discovered device gets its HA discovery payload published before its
/// first state, an updated one is simply republished if due.
fn dispatch_events(catalog: &Rc<RefCell<Catalog>>, handle: &PublishHandle, topic: &str, topic_config: &str, events: Vec<CatalogEvent>) {
    let mut cat = catalog.borrow_mut();
    for event in events {
        let (device_id, discovered) = match event {
            CatalogEvent::Discovered(id) => (id, true),
            CatalogEvent::Updated(id) => (id, false),
        };
        let frame_addr = crate::registry::frame_addr_of_device(device_id);
        let name = crate::registry::device_id_name(device_id);
        let Some(device) = cat.get_mut(device_id) else { continue };
        if discovered {
            // Module type/firmware aren't threaded through the event path;
            // the discovery payload's optional `device.mdl`/`sw` stay unset
            // here and get filled in on the next `showmodule` admin query.
            let payload = publisher::discovery_payload(device, frame_addr, topic, None, None);
            handle.publish_discovery(publisher::config_topic(topic_config, device.ha.platform(), &name), payload);
        }
        let now = std::time::Instant::now();
        if device.due_for_publish(now, Duration::from_secs(60)) {
            handle.publish_state(publisher::state_topic(topic, device.ha.platform(), &name), device.value_ha.clone());
            device.mark_published(now);
        }
    }
}

async fn serve_telnet(listener: TcpListener, controls: Rc<RefCell<BTreeMap<u8, BusControl>>>, catalog: Rc<RefCell<Catalog>>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("admin session from {peer}");
        let controls = controls.clone();
        let catalog = catalog.clone();
        tokio::task::spawn_local(async move {
            if let Err(err) = handle_session(stream, controls, catalog).await {
                log::debug!("admin session {peer} ended: {err}");
            }
        });
    }
}

async fn handle_session(stream: TcpStream, controls: Rc<RefCell<BTreeMap<u8, BusControl>>>, catalog: Rc<RefCell<Catalog>>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut session = Session::default();
    writer.write_all(admin::HELP_TEXT.as_bytes()).await?;
    while let Some(line) = lines.next_line().await? {
        let reply = match admin::parse_line(&line) {
            Ok(cmd) => execute(cmd, &mut session, &controls, &catalog).await,
            Err(err) => format!("error: {err}\n"),
        };
        writer.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

async fn execute(cmd: Command, session: &mut Session, controls: &Rc<RefCell<BTreeMap<u8, BusControl>>>, catalog: &Rc<RefCell<Catalog>>) -> String {
    match cmd {
        Command::Help => admin::HELP_TEXT.to_string(),
        Command::ShowBus { bus_id } => {
            if let Some(id) = bus_id {
                session.bus_id = Some(id);
            }
            let bus_id = match session.bus_id.or(bus_id) {
                Some(id) => id,
                None => return "no bus selected\n".into(),
            };
            let cat = catalog.borrow();
            let mut modules: Vec<u32> = cat
                .iter()
                .map(|(id, _)| crate::registry::frame_addr_of_device(*id))
                .filter(|fa| crate::registry::bus_id_of(*fa) == bus_id)
                .collect();
            modules.sort_unstable();
            modules.dedup();
            let mut out = format!("bus {bus_id:02x}:\n");
            for m in modules {
                out.push_str(&format!("  module {:04x}\n", crate::registry::module_addr_of(m)));
            }
            out
        }
        Command::ShowModule { addr } => {
            let Some(bus_id) = session.bus_id else { return "no bus selected\n".into() };
            let Some(module_addr) = addr.or(session.module_addr) else { return "no module selected\n".into() };
            session.module_addr = Some(module_addr);
            let Some(control) = controls.borrow().get(&bus_id).cloned() else { return "unknown bus\n".into() };
            let (tx, rx) = tokio::sync::oneshot::channel();
            if control.send(AdminOp::Describe { module_addr, reply: tx }).is_err() {
                return "bus task unavailable\n".into();
            }
            match rx.await {
                Ok(Some(desc)) => format!(
                    "module {module_addr:04x}: type={:?} fw={:?} queued={}\n",
                    desc.module_type, desc.firmware_version, desc.queue_len
                ),
                _ => "module unknown\n".into(),
            }
        }
        Command::Refresh { reset } => {
            let _ = reset;
            let controls = controls.borrow();
            for (bus_id, control) in controls.iter() {
                let cat = catalog.borrow();
                let module_addrs: Vec<u16> = cat
                    .iter()
                    .map(|(id, _)| crate::registry::frame_addr_of_device(*id))
                    .filter(|fa| crate::registry::bus_id_of(*fa) == *bus_id)
                    .map(crate::registry::module_addr_of)
                    .collect();
                drop(cat);
                for module_addr in module_addrs {
                    let _ = control.send(AdminOp::AskConfig { module_addr });
                }
            }
            "refreshing\n".into()
        }
        Command::RmModule { addrs } => {
            let Some(bus_id) = session.bus_id else { return "no bus selected\n".into() };
            let Some(control) = controls.borrow().get(&bus_id).cloned() else { return "unknown bus\n".into() };
            for addr in &addrs {
                let _ = control.send(AdminOp::RemoveModule { module_addr: *addr });
            }
            let mut cat = catalog.borrow_mut();
            let to_remove: Vec<u64> = cat
                .iter()
                .filter(|(id, _)| {
                    let fa = crate::registry::frame_addr_of_device(**id);
                    crate::registry::bus_id_of(fa) == bus_id && addrs.contains(&crate::registry::module_addr_of(fa))
                })
                .map(|(id, _)| *id)
                .collect();
            for id in to_remove {
                cat.remove(id);
            }
            format!("removed {} module(s)\n", addrs.len())
        }
        Command::SetPort { port, tokens } => {
            let Some(bus_id) = session.bus_id else { return "no bus selected\n".into() };
            let Some(module_addr) = session.module_addr else { return "no module selected\n".into() };
            let frame_addr = crate::registry::frame_addr(bus_id, module_addr);
            let device_id = crate::registry::device_id(frame_addr, port as u16);
            let mut cat = catalog.borrow_mut();
            let Some(device) = cat.get_mut(device_id) else { return "unknown port\n".into() };
            for token in tokens {
                match token {
                    SetportToken::PortType(_) | SetportToken::PortOpt(_) => {
                        // Re-typing a port on the fly changes wire semantics
                        // enough that it is only supported via re-enumeration.
                    }
                    SetportToken::Option { key, value } => {
                        if let Ok(num) = value.parse::<f64>() {
                            device.options.insert(key, crate::catalog::OptionValue::Num(num));
                        } else {
                            device.options.insert(key, crate::catalog::OptionValue::Text(value));
                        }
                    }
                    SetportToken::Ha { key, value } => apply_ha_override(&mut device.ha, &key, &value),
                }
            }
            "ok\n".into()
        }
    }
}

fn apply_ha_override(ha: &mut crate::catalog::HaOpts, key: &str, value: &str) {
    match key {
        "platform" => ha.platform = Some(value.to_string()),
        "device_class" => ha.device_class = Some(value.to_string()),
        "unit" => ha.unit = Some(value.to_string()),
        "min" => ha.min = value.parse().ok(),
        "max" => ha.max = value.parse().ok(),
        "step" => ha.step = value.parse().ok(),
        "icon" => ha.icon = Some(value.to_string()),
        "options" => ha.options = Some(value.split('|').map(str::to_string).collect()),
        _ => {}
    }
}
