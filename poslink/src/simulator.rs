//! Simulated terminal
//!
//! A scriptable stand-in for an X30TR or 300TR that serves the host side of a
//! [`MemoryTransport`]. Integration tests and the demo binary use it when no
//! real terminal is at hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use poslink_core::{codec, ConnectAck, DeviceEvent, Frame, FrameKind};
use poslink_transport::{MemoryAcceptor, MemoryPeer, MemoryTransport};
use poslink_types::{Basket, DeviceClass, FiscalRecord, Payment};

/// How the simulated terminal answers commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatorMode {
    /// Accept everything that decodes
    #[default]
    Normal,
    /// Answer every command with `Busy`
    Busy,
    /// Answer every command with `Rejected`
    Reject,
    /// Read commands and never answer
    Silent,
}

struct Script {
    mode: SimulatorMode,
    answer_handshake: bool,
    reorder_batch: usize,
    fiscal_record: FiscalRecord,
    baskets: Vec<Basket>,
    payments: Vec<Payment>,
    links_accepted: usize,
    linked: bool,
}

enum Control {
    Push(DeviceEvent),
    DropLink,
}

/// Handle to a running simulated terminal
pub struct Simulator {
    device_class: DeviceClass,
    device_id: String,
    script: Arc<Mutex<Script>>,
    controls: mpsc::UnboundedSender<Control>,
    accepting: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Simulator {
    /// Serve links arriving on `acceptor` as a terminal of `device_class`
    pub fn spawn(acceptor: MemoryAcceptor, device_class: DeviceClass) -> Self {
        let device_id = format!("{}-SIM-0001", device_class.name());
        let script = Arc::new(Mutex::new(Script {
            mode: SimulatorMode::Normal,
            answer_handshake: true,
            reorder_batch: 1,
            fiscal_record: default_fiscal_record(),
            baskets: Vec::new(),
            payments: Vec::new(),
            links_accepted: 0,
            linked: false,
        }));
        let (controls, control_rx) = mpsc::unbounded_channel();
        let accepting = acceptor.accepting_flag();

        let terminal = Terminal {
            device_class,
            device_id: device_id.clone(),
            script: script.clone(),
        };
        let task = tokio::spawn(terminal.run(acceptor, control_rx));

        info!(device = %device_class, device_id = %device_id, "Simulator started");

        Self {
            device_class,
            device_id,
            script,
            controls,
            accepting,
            task,
        }
    }

    /// Memory transport wired to a fresh simulator
    pub fn memory(device_class: DeviceClass) -> (MemoryTransport, Self) {
        let (transport, acceptor) = MemoryTransport::pair(format!("sim-{}", device_class.name()));
        (transport, Self::spawn(acceptor, device_class))
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_mode(&self, mode: SimulatorMode) {
        self.script.lock().mode = mode;
    }

    /// Hold responses until `batch` are ready, then send them newest first
    pub fn set_reorder_batch(&self, batch: usize) {
        self.script.lock().reorder_batch = batch.max(1);
    }

    /// Whether `Connect` is acknowledged at all
    pub fn set_answer_handshake(&self, answer: bool) {
        self.script.lock().answer_handshake = answer;
    }

    pub fn set_fiscal_record(&self, record: FiscalRecord) {
        self.script.lock().fiscal_record = record;
    }

    /// Refuse (or accept again) new links
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Push an unsolicited event over the current link
    ///
    /// Returns `false` when no link is up; the event is discarded.
    pub fn push_event(&self, event: DeviceEvent) -> bool {
        self.is_linked() && self.controls.send(Control::Push(event)).is_ok()
    }

    pub fn push_serial_input(&self, tag: u32, payload: impl Into<String>) -> bool {
        self.push_event(DeviceEvent::SerialInput {
            tag,
            payload: payload.into(),
        })
    }

    /// Close the current link from the terminal side
    pub fn drop_link(&self) {
        // Ignored when the task already stopped
        let _ = self.controls.send(Control::DropLink);
    }

    pub fn is_linked(&self) -> bool {
        self.script.lock().linked
    }

    /// Baskets accepted so far
    pub fn baskets(&self) -> Vec<Basket> {
        self.script.lock().baskets.clone()
    }

    /// Standalone payments accepted so far
    pub fn payments(&self) -> Vec<Payment> {
        self.script.lock().payments.clone()
    }

    pub fn links_accepted(&self) -> usize {
        self.script.lock().links_accepted
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Terminal {
    device_class: DeviceClass,
    device_id: String,
    script: Arc<Mutex<Script>>,
}

impl Terminal {
    async fn run(self, mut acceptor: MemoryAcceptor, mut controls: mpsc::UnboundedReceiver<Control>) {
        loop {
            tokio::select! {
                peer = acceptor.accept() => {
                    let Some(peer) = peer else {
                        debug!("Simulator transport dropped");
                        return;
                    };
                    self.serve(peer, &mut controls).await;
                }
                control = controls.recv() => {
                    if control.is_none() {
                        return;
                    }
                    trace!("Simulator idle, discarding control");
                }
            }
        }
    }

    async fn serve(&self, mut peer: MemoryPeer, controls: &mut mpsc::UnboundedReceiver<Control>) {
        {
            let mut script = self.script.lock();
            script.links_accepted += 1;
            script.linked = true;
        }
        debug!(device_id = %self.device_id, "Simulator link opened");

        let mut held: Vec<Frame> = Vec::new();

        loop {
            tokio::select! {
                incoming = peer.recv() => {
                    let Some(buf) = incoming else {
                        debug!("Host closed simulator link");
                        break;
                    };
                    let frame = match Frame::decode(buf) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Simulator dropping undecodable frame");
                            continue;
                        }
                    };
                    let Some(reply) = self.reply(&frame) else {
                        continue;
                    };

                    let batch = self.script.lock().reorder_batch;
                    held.push(reply);
                    if held.len() >= batch {
                        for reply in held.drain(..).rev() {
                            if peer.send(reply.encode().freeze()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                control = controls.recv() => match control {
                    Some(Control::Push(event)) => {
                        let frame = codec::encode_event(&event);
                        if peer.send(frame.encode().freeze()).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::DropLink) | None => {
                        debug!("Simulator dropping link");
                        break;
                    }
                }
            }
        }

        self.script.lock().linked = false;
    }

    fn reply(&self, frame: &Frame) -> Option<Frame> {
        let id = frame.correlation_id;
        let mut script = self.script.lock();

        match frame.kind {
            FrameKind::Connect => {
                if !script.answer_handshake {
                    return None;
                }
                let ack = ConnectAck::new(self.device_class, self.device_id.clone());
                let payload = codec::encode_connect_ack(&ack).ok()?;
                return Some(Frame::with_payload(FrameKind::Ack, id, payload));
            }
            FrameKind::Disconnect => return None,
            kind if !kind.is_request() => {
                trace!(frame = %frame, "Simulator ignoring non-request frame");
                return None;
            }
            _ => {}
        }

        match script.mode {
            SimulatorMode::Normal => {}
            SimulatorMode::Busy => return Some(Frame::new(FrameKind::Busy, id)),
            SimulatorMode::Reject => return Some(Frame::new(FrameKind::Rejected, id)),
            SimulatorMode::Silent => return None,
        }

        let reply = match frame.kind {
            FrameKind::SendBasket => match codec::decode_basket(&frame.payload) {
                Ok(basket) => {
                    script.baskets.push(basket);
                    Frame::new(FrameKind::Ack, id)
                }
                Err(e) => {
                    debug!(error = %e, "Simulator rejecting basket");
                    Frame::new(FrameKind::InvalidData, id)
                }
            },
            FrameKind::SendPayment if !self.device_class.supports_standalone_payment() => {
                Frame::new(FrameKind::Rejected, id)
            }
            FrameKind::SendPayment => match codec::decode_payment(&frame.payload) {
                Ok(payment) => {
                    script.payments.push(payment);
                    Frame::new(FrameKind::Ack, id)
                }
                Err(e) => {
                    debug!(error = %e, "Simulator rejecting payment");
                    Frame::new(FrameKind::InvalidData, id)
                }
            },
            FrameKind::GetFiscalInfo => match codec::encode_fiscal_info(&script.fiscal_record) {
                Ok(payload) => Frame::with_payload(FrameKind::AckData, id, payload),
                Err(_) => Frame::new(FrameKind::Rejected, id),
            },
            _ => Frame::new(FrameKind::Ack, id),
        };

        Some(reply)
    }
}

fn default_fiscal_record() -> FiscalRecord {
    FiscalRecord {
        serial_number: "SIM0000001".into(),
        z_number: 1,
        receipt_number: 0,
        total_amount: 0,
        total_tax: 0,
        device_time: None,
    }
}
