//! Per-bus driver: owns one serial transport, its frame [`Decoder`], and the
//! [`TxScheduler`] that decides what goes out next. Mirrors the teacher's
//! `next_message`-over-a-port loop, but async and frame-oriented instead of
//! message-oriented.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::catalog::{Catalog, CatalogEvent};
use crate::codec::Decoder;
use crate::config::BusConfig;
use crate::protocol;
use crate::txqueue::{TxCommand, TxScheduler};

/// How often the scheduler tick fires, independent of inbound traffic.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(200);

/// Requests the admin session sends to a running bus task, since the task
/// owns the `TxScheduler`/serial handles and the admin session does not.
pub enum AdminOp {
    AskConfig { module_addr: u16 },
    RemoveModule { module_addr: u16 },
    Describe { module_addr: u16, reply: tokio::sync::oneshot::Sender<Option<ModuleDescription>> },
}

#[derive(Clone, Debug)]
pub struct ModuleDescription {
    pub module_type: Option<String>,
    pub firmware_version: Option<String>,
    pub queue_len: usize,
}

/// Sender half of a bus's control channel, handed to the admin session.
pub type BusControl = mpsc::UnboundedSender<AdminOp>;

/// Per-bus driver. The serial port is split into independent read/write
/// halves so the inbound-byte future and the scheduler-tick future can be
/// raced with `tokio::select!` without both needing a mutable borrow of the
/// same handle.
pub struct Bus {
    pub bus_id: u8,
    reader: ReadHalf<SerialStream>,
    writer: WriteHalf<SerialStream>,
    decoder: Decoder,
    pub scheduler: TxScheduler,
    control: mpsc::UnboundedReceiver<AdminOp>,
}

impl Bus {
    pub fn open(bus_id: u8, cfg: &BusConfig) -> tokio_serial::Result<(Self, BusControl)> {
        let port = tokio_serial::new(&cfg.device, cfg.baud).open_native_async()?;
        let (reader, writer) = tokio::io::split(port);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Ok((Bus { bus_id, reader, writer, decoder: Decoder::new(), scheduler: TxScheduler::new(), control: control_rx }, control_tx))
    }

    /// Drives this bus forever: alternates between draining available input,
    /// firing scheduler ticks, and servicing admin requests, per the
    /// single-threaded cooperative model.
    pub async fn run(mut self, catalog_cell: Rc<RefCell<Catalog>>, on_events: impl Fn(Vec<CatalogEvent>)) -> std::io::Result<()> {
        let mut ticker = tokio::time::interval(SCHEDULER_TICK);
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                result = self.reader.read(&mut buf) => {
                    let n = result?;
                    if n == 0 {
                        continue;
                    }
                    self.decoder.push(&buf[..n]);
                    let mut events = Vec::new();
                    while let Some(frame) = self.decoder.next_frame() {
                        let now = Instant::now();
                        let mut catalog = catalog_cell.borrow_mut();
                        let mut frame_events = protocol::handle_frame(self.bus_id, &frame, &mut self.scheduler, &mut catalog, now);
                        events.append(&mut frame_events);
                    }
                    if !events.is_empty() {
                        on_events(events);
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let frames = {
                        let catalog = catalog_cell.borrow();
                        self.scheduler.drain_tick(now, |frame_addr| status_snapshot(frame_addr, &catalog))
                    };
                    for frame in frames {
                        self.writer.write_all(&frame.bytes).await?;
                    }
                }
                Some(op) = self.control.recv() => {
                    self.handle_admin_op(op);
                }
            }
        }
    }

    fn handle_admin_op(&mut self, op: AdminOp) {
        match op {
            AdminOp::AskConfig { module_addr } => self.ask_config(module_addr),
            AdminOp::RemoveModule { module_addr } => self.remove_module(module_addr),
            AdminOp::Describe { module_addr, reply } => {
                let frame_addr = crate::registry::frame_addr(self.bus_id, module_addr);
                let queue_len = self.scheduler.queue_len(frame_addr);
                let description = self.scheduler.module(frame_addr).map(|m| ModuleDescription {
                    module_type: m.module_type.clone(),
                    firmware_version: m.firmware_version.clone(),
                    queue_len,
                });
                let _ = reply.send(description);
            }
        }
    }

    /// Enqueues the initial `AskConfig` for a module the admin layer wants
    /// re-enumerated (`refresh`/`refresh reset`).
    fn ask_config(&mut self, module_addr: u16) {
        let frame_addr = crate::registry::frame_addr(self.bus_id, module_addr);
        self.scheduler.enqueue_ask_config(frame_addr, Instant::now());
    }

    fn remove_module(&mut self, module_addr: u16) {
        let frame_addr = crate::registry::frame_addr(self.bus_id, module_addr);
        self.scheduler.remove(frame_addr, None, 0xFF, None);
    }
}

/// Builds the re-send-everything snapshot for a module's periodic status
/// refresh: one `SET` echo per known output device on that module, so the
/// bus's current state is retransmitted even without a triggering change.
fn status_snapshot(frame_addr: u32, catalog: &Catalog) -> Vec<TxCommand> {
    catalog
        .iter()
        .filter(|(id, _)| crate::registry::frame_addr_of_device(**id) == frame_addr)
        .filter_map(|(id, device)| {
            let port = crate::registry::port_of_device(*id);
            if port > 0xFF {
                return None; // virtual sub-port, not a wire-addressable port
            }
            Some(TxCommand {
                kind: crate::codec::CmdKind::Set,
                ack: false,
                port: port as u8,
                args: vec![device.value as i64 as u8],
                retries_left: crate::txqueue::TX_RETRY,
            })
        })
        .collect()
}
