//! Protocol Engine: turns a decoded frame into registry/catalog mutations
//! and a list of events for the Publisher, and turns acknowledgement
//! obligations into queued TX commands. Pure with respect to I/O — callers
//! own the serial transport and the MQTT client.

use std::time::Instant;

use crate::catalog::{Catalog, CatalogEvent, Device, OptionValue, PortOpt, PortType};
use crate::codec::{CmdKind, Frame, RawCommand};
use crate::registry;
use crate::txqueue::{TxCommand, TxScheduler, TX_RETRY};

/// Largest `DCMD` argument the stub activation will log-and-acknowledge;
/// anything at or above this is out of range and only forwarded/logged.
pub const DCMD_MAX: u8 = 32;

fn ack_of(kind: CmdKind, port: u8, echo: Vec<u8>) -> TxCommand {
    TxCommand { kind, ack: true, port, args: echo, retries_left: TX_RETRY }
}

/// Processes one already-checksum-valid frame arriving on `bus_id`, mutating
/// `registry`/`catalog` and queuing any acknowledgements. Returns the
/// publish-worthy events for the caller to hand to the Publisher.
pub fn handle_frame(bus_id: u8, frame: &Frame, sched: &mut TxScheduler, catalog: &mut Catalog, now: Instant) -> Vec<CatalogEvent> {
    let mut events = Vec::new();

    if frame.src == crate::codec::ADDR_BROADCAST || frame.src == crate::codec::ADDR_CONTROLLER {
        // Broadcasts are recorded (liveness) but never mutate a device.
        return events;
    }

    let frame_addr = registry::frame_addr(bus_id, frame.src);
    sched.note_rx(frame_addr, now);

    let known_module = sched.module(frame_addr).map(|m| m.module_type.is_some()).unwrap_or(false);

    for cmd in &frame.commands {
        if !cmd.ack && !known_module && cmd.kind != CmdKind::Config {
            sched.enqueue_ask_config(frame_addr, now);
            continue;
        }
        match (cmd.kind, cmd.ack) {
            (CmdKind::Config, true) if cmd.port == 0xFE => handle_version_ack(frame_addr, cmd, sched, now),
            (CmdKind::Config, true) if cmd.port != 0xFE && cmd.port & 0xF0 == 0xF0 => {
                handle_port_enum_ack(frame_addr, cmd, sched, catalog, now, &mut events);
            }
            (CmdKind::Set, true) => handle_set_ack(frame_addr, cmd, catalog, &mut events),
            (CmdKind::Set, false) => handle_set(frame_addr, cmd, sched, catalog, now, &mut events),
            (CmdKind::Get, false) => handle_get(frame_addr, cmd, sched, catalog, now),
            (CmdKind::Config, false) if (0xE0..=0xEF).contains(&cmd.port) => {
                log::info!("module {:06x} log: {}", frame_addr, String::from_utf8_lossy(&cmd.args));
                sched.enqueue(frame_addr, ack_of(CmdKind::Config, cmd.port, Vec::new()), now);
            }
            (CmdKind::Dcmd, false) => handle_dcmd(frame_addr, cmd, sched, now),
            _ => {}
        }
    }
    events
}

fn handle_version_ack(frame_addr: u32, cmd: &RawCommand, sched: &mut TxScheduler, now: Instant) {
    if cmd.args.len() < 5 {
        return;
    }
    let revision = format!("{:02x}{:02x}{:02x}{:02x}", cmd.args[0], cmd.args[1], cmd.args[2], cmd.args[3]);
    let name_bytes = &cmd.args[4..];
    let module_type = String::from_utf8_lossy(name_bytes.split(|&b| b == 0).next().unwrap_or(&[])).to_string();
    let m = sched.module_record_mut(frame_addr, now);
    m.firmware_version = Some(revision);
    m.module_type = Some(module_type);
    sched.force_status_refresh(frame_addr, now);
}

fn handle_port_enum_ack(
    frame_addr: u32,
    cmd: &RawCommand,
    sched: &mut TxScheduler,
    catalog: &mut Catalog,
    now: Instant,
    events: &mut Vec<CatalogEvent>,
) {
    let body = &cmd.args;
    if body.is_empty() || body[0] != 2 {
        log::warn!("module {:06x}: unsupported port-enumeration protocol version {:?}", frame_addr, body.first());
        return;
    }
    // body[0] is the protocol-version byte (checked above); for port 0xFF the
    // enumeration always starts at port 1, otherwise the next body byte is
    // the starting-port override and the record stream begins one byte later.
    let mut i = 1usize;
    let mut next_port: u16 = if cmd.port == 0xFF {
        1
    } else {
        let Some(&override_port) = body.get(i) else { return };
        i += 1;
        override_port as u16
    };
    let module_type = sched.module(frame_addr).and_then(|m| m.module_type.clone());
    while i + 6 <= body.len() {
        let port_type_raw = u32::from_be_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]]);
        let port_opt_raw = u16::from_be_bytes([body[i + 4], body[i + 5]]);
        i += 6;
        let name_start = i;
        while i < body.len() && body[i] != 0 {
            i += 1;
        }
        let name = String::from_utf8_lossy(&body[name_start..i]).to_string();
        i += 1; // skip NUL
        let port = next_port;
        next_port += 1;

        // portType == 0 marks a disabled port; decode_port_type rejects it
        // along with any value outside the known range.
        let Some(port_type) = decode_port_type(port_type_raw) else { continue };
        let port_opt = decode_port_opt(port_opt_raw);

        let device_id = registry::device_id(frame_addr, port);
        if catalog.get(device_id).is_none() {
            let defaults = crate::catalog::port_defaults(port_type, port_opt, &name, port, module_type.as_deref());
            let mut ha = defaults.ha;
            if ha.platform.is_none() {
                ha.platform = Some(default_platform(port_type).into());
            }
            let device = Device::new(device_id, port_type, port_opt, name.clone(), defaults.options, ha);
            catalog.insert(device);
            for (offset, sub) in defaults.virtual_subports {
                let sub_id = registry::device_id(frame_addr, port + offset);
                let mut sub_ha = sub.ha;
                if sub_ha.platform.is_none() {
                    sub_ha.platform = Some("number".into());
                }
                catalog.insert(Device::new(sub_id, PortType::Custom, PortOpt::None, format!("{name}.par"), sub.options, sub_ha));
            }
            events.push(CatalogEvent::Discovered(device_id));
        }
    }
    sched.remove(frame_addr, None, 0xFF & cmd.port, None);
}

fn decode_port_type(raw: u32) -> Option<PortType> {
    Some(match raw {
        1 => PortType::InDigital,
        2 => PortType::OutDigital,
        3 => PortType::OutRelay,
        4 => PortType::OutRelayLp,
        5 => PortType::OutDimmer,
        6 => PortType::InAnalog,
        7 => PortType::SensorTemp,
        8 => PortType::SensorHum,
        9 => PortType::SensorTempHum,
        10 => PortType::InCounter,
        11 => PortType::SensorAlarm,
        12 => PortType::SensorDistance,
        13 => PortType::InTwinButton,
        14 => PortType::OutBlind,
        15 => PortType::OutBuzzer,
        16 => PortType::OutLedStatus,
        17 => PortType::InAc,
        18 => PortType::Custom,
        _ => return None,
    })
}

fn decode_port_opt(raw: u16) -> PortOpt {
    match raw {
        1 => PortOpt::ImportEnergy,
        2 => PortOpt::ExportEnergy,
        3 => PortOpt::Voltage,
        4 => PortOpt::Current,
        5 => PortOpt::Select,
        6 => PortOpt::Dimmer,
        7 => PortOpt::LatchingRelay,
        8 => PortOpt::PowerFactor,
        9 => PortOpt::Frequency,
        10 => PortOpt::Touch,
        11 => PortOpt::Address,
        _ => PortOpt::None,
    }
}

fn default_platform(port_type: PortType) -> &'static str {
    match port_type {
        PortType::InDigital | PortType::InTwinButton | PortType::SensorAlarm | PortType::InAc => "binary_sensor",
        PortType::OutDigital | PortType::OutRelay | PortType::OutRelayLp | PortType::OutLedStatus => "switch",
        PortType::OutDimmer => "light",
        PortType::OutBlind => "cover",
        PortType::OutBuzzer => "switch",
        PortType::SensorTemp | PortType::SensorHum | PortType::SensorTempHum | PortType::InAnalog | PortType::SensorDistance | PortType::InCounter => "sensor",
        PortType::Custom => "sensor",
    }
}

fn handle_set_ack(frame_addr: u32, cmd: &RawCommand, catalog: &mut Catalog, events: &mut Vec<CatalogEvent>) {
    let device_id = registry::device_id(frame_addr, cmd.port as u16);
    let Some(device) = catalog.get_mut(device_id) else { return };
    if let Some(&raw) = cmd.args.first() {
        device.set_raw(raw as i64);
        events.push(CatalogEvent::Updated(device_id));
    }
}

fn handle_set(frame_addr: u32, cmd: &RawCommand, sched: &mut TxScheduler, catalog: &mut Catalog, now: Instant, events: &mut Vec<CatalogEvent>) {
    let device_id = registry::device_id(frame_addr, cmd.port as u16);
    let mut opposite: Option<u64> = None;
    if let Some(device) = catalog.get_mut(device_id) {
        match cmd.args.len() {
            1 => {
                // ALARM state and plain boolean/level both fit in the raw
                // scaled value; the alarm enum (closed/open/masked/...) lives
                // entirely in valueHA normalisation, not here.
                device.set_raw(cmd.args[0] as i64);
            }
            2 => {
                let raw = u16::from_be_bytes([cmd.args[0], cmd.args[1]]);
                let is_power = device.ha.device_class.as_deref() == Some("power");
                if device.port_type == PortType::SensorTemp {
                    let sample = if device.options.get("FUNCTION").and_then(OptionValue::as_str) == Some("3950") {
                        Device::ntc_beta_celsius(raw)
                    } else {
                        raw as f64 / 10.0 - 273.1
                    };
                    device.apply_smoothed(sample);
                } else if is_power {
                    device.set_raw(raw as i16 as i64);
                } else {
                    device.set_raw(raw as i64);
                }
            }
            4 => {
                let current = u16::from_be_bytes([cmd.args[0], cmd.args[1]]);
                let previous = u16::from_be_bytes([cmd.args[2], cmd.args[3]]);
                device.apply_counter_pair(current, previous, now);
            }
            6 => {
                let power = i16::from_be_bytes([cmd.args[0], cmd.args[1]]);
                let energy = u32::from_be_bytes([cmd.args[2], cmd.args[3], cmd.args[4], cmd.args[5]]);
                device.value = power as f64;
                device.energy_kwh = energy as f64 * 10.0 / 1000.0;
                device.recompute_value_ha();
            }
            _ => {}
        }
        events.push(CatalogEvent::Updated(device_id));
        if device.has_auxiliary() {
            events.push(CatalogEvent::Updated(crate::catalog::aux_device_id(device_id)));
        }
        if let Some(opposite_name) = device.options.get("OPPOSITE").and_then(OptionValue::as_str).map(str::to_owned) {
            opposite = crate::catalog::parse_dev_id_name(&opposite_name);
        }
    }
    if let Some(opp_id) = opposite {
        if catalog.clear_opposite(opp_id) {
            events.push(CatalogEvent::Updated(opp_id));
        }
    }
    let echo = cmd.args.first().copied().into_iter().collect();
    sched.enqueue(frame_addr, ack_of(CmdKind::Set, cmd.port, echo), now);
}

fn handle_get(frame_addr: u32, cmd: &RawCommand, sched: &mut TxScheduler, catalog: &mut Catalog, now: Instant) {
    if cmd.port == 0 {
        sched.force_status_refresh(frame_addr, now);
        sched.enqueue(frame_addr, ack_of(CmdKind::Get, cmd.port, vec![0]), now);
        return;
    }
    let device_id = registry::device_id(frame_addr, cmd.port as u16);
    let lsb = catalog.get(device_id).map(|d| (d.value as i64 & 0xFF) as u8).unwrap_or(0);
    sched.enqueue(frame_addr, ack_of(CmdKind::Get, cmd.port, vec![lsb]), now);
}

fn handle_dcmd(frame_addr: u32, cmd: &RawCommand, sched: &mut TxScheduler, now: Instant) {
    let arg = cmd.args.first().copied().unwrap_or(0);
    if arg < DCMD_MAX {
        log::debug!("module {:06x}: dcmd {} (stub, not actuated)", frame_addr, arg);
    } else {
        log::debug!("module {:06x}: dcmd {} forwarded", frame_addr, arg);
    }
    sched.enqueue(frame_addr, ack_of(CmdKind::Dcmd, cmd.port, vec![arg]), now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, OptionValue, PortType};
    use crate::codec::{CmdKind, Frame, RawCommand};
    use crate::txqueue::TxScheduler;

    #[test]
    fn port_enumeration_ack_on_0xff_creates_device_with_defaults() {
        // Matches spec scenario C: protocol=2, one IN_COUNTER record named
        // "Import", no starting-port override (0xFF always begins at port 1).
        let mut body = vec![2u8];
        body.extend_from_slice(&10u32.to_be_bytes()); // portType = IN_COUNTER
        body.extend_from_slice(&0u16.to_be_bytes()); // portOpt = none
        body.extend_from_slice(b"Import\0");
        let cmd = RawCommand::new(CmdKind::Config, true, 0xFF, body);
        let frame = Frame { dst: 0, src: 0x01FF, commands: vec![cmd] };

        let mut sched = TxScheduler::new();
        let mut catalog = Catalog::new();
        let events = handle_frame(1, &frame, &mut sched, &mut catalog, Instant::now());

        let frame_addr = registry::frame_addr(1, 0x01FF);
        let device_id = registry::device_id(frame_addr, 1);
        let device = catalog.get(device_id).expect("device created");
        assert_eq!(device.port_type, PortType::InCounter);
        assert_eq!(device.options.get("DIVIDER").and_then(OptionValue::as_f64), Some(2000.0));
        assert!(events.iter().any(|e| matches!(e, CatalogEvent::Discovered(id) if *id == device_id)));
    }

    #[test]
    fn port_enumeration_ack_on_bulk_port_honours_start_port_override() {
        let mut body = vec![2u8, 5u8]; // protocol version, starting port = 5
        body.extend_from_slice(&3u32.to_be_bytes()); // portType = OUT_RELAY
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(b"RL1\0");
        let cmd = RawCommand::new(CmdKind::Config, true, 0xF1, body);
        let frame = Frame { dst: 0, src: 0x01FF, commands: vec![cmd] };

        let mut sched = TxScheduler::new();
        let mut catalog = Catalog::new();
        handle_frame(1, &frame, &mut sched, &mut catalog, Instant::now());

        let frame_addr = registry::frame_addr(1, 0x01FF);
        let device_id = registry::device_id(frame_addr, 5);
        assert!(catalog.get(device_id).is_some());
    }

    #[test]
    fn tx_frames_are_addressed_dst_equals_module_src_equals_controller() {
        let mut sched = TxScheduler::new();
        let now = Instant::now();
        sched.enqueue_ask_config(crate::registry::frame_addr(1, 0x01FF), now);
        let frames = sched.drain_tick(now + std::time::Duration::from_secs(10), |_| Vec::new());
        assert_eq!(frames.len(), 1);
        let mut dec = crate::codec::Decoder::new();
        dec.push(&frames[0].bytes);
        let decoded = dec.next_frame().expect("valid frame");
        assert_eq!(decoded.dst, 0x01FF);
        assert_eq!(decoded.src, crate::codec::ADDR_CONTROLLER);
    }
}
