//! AMBE device driver -- the hardest subsystem. Owns one DVSI USB vocoder
//! (1 channel for 3000-class, up to 3 for 3003-class), running a feeder
//! thread (submits work) and a reader thread (matches responses back to the
//! submitting frame).

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info, trace, warn};

use crate::config::DeviceClass;
use crate::errors::DeviceError;
use crate::frame::{CodecKind, Frame};
use crate::queue::{FrameQueue, OVERFLOW_LIMIT};
use crate::router::{AmbeSink, Dispatcher};

use super::protocol::{
    DvsiPacket, HexDump, PKT_CHANNEL, PKT_CHANNEL0, PKT_CONTROL, PKT_PARITYMODE,
    PKT_PARITYBYTE, PKT_PRODID, PKT_READY, PKT_RESET, PKT_SPEECH, PKT_VERSTRING, RATEP_DMR,
    RATEP_DSTAR, START_BYTE,
};
use super::transport::DvsiTransport;

const MAX_RESYNC_TRIES: usize = 1024 + 2;
const BUFFER_DEPTH_LIMIT: usize = 2;
const FEEDER_BACKOFF: Duration = Duration::from_millis(5);

/// Blocks the calling thread until one fully-framed response arrives,
/// re-synchronizing to `START_BYTE` if the stream is out of phase.
fn get_response(transport: &dyn DvsiTransport) -> io::Result<DvsiPacket> {
    let mut start = [0u8; 1];
    let mut tries = 0;
    loop {
        transport.read_exact(&mut start)?;
        if start[0] == START_BYTE {
            break;
        }
        tries += 1;
        if tries >= MAX_RESYNC_TRIES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "couldn't find start byte"));
        }
    }

    let mut header = [0u8; 3];
    transport.read_exact(&mut header)?;
    let payload_length = BigEndian::read_u16(&header[0..2]) as usize;
    let packet_type = header[2];

    if payload_length == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "zero-length response"));
    }
    let mut rest = vec![0u8; payload_length];
    transport.read_exact(&mut rest)?;
    let field_id = rest[0];
    let payload = rest[1..].to_vec();

    Ok(DvsiPacket {
        packet_type,
        field_id,
        payload,
    })
}

fn check_control_ack(resp: &DvsiPacket, expected_field_id: u8, step: &'static str, description: &str) -> Result<(), DeviceError> {
    if resp.packet_type != PKT_CONTROL || resp.field_id != expected_field_id {
        return Err(DeviceError::InitAckMismatch {
            description: description.to_string(),
            step,
        });
    }
    Ok(())
}

/// One DVSI hardware channel's round-trip state: the feeder's end of the
/// waiting-packet FIFO the reader drains.
struct Channel {
    tx: Sender<Arc<Frame>>,
    rx: Receiver<Arc<Frame>>,
}

pub struct AmbeDevice<T: DvsiTransport> {
    transport: T,
    kind: CodecKind,
    class: DeviceClass,
    description: String,
    modules: Vec<char>,
    channels: Vec<Channel>,
    input_queue: Arc<FrameQueue>,
    buffer_depth: AtomicUsize,
    keep_running: AtomicBool,
    dispatcher: OnceLock<Arc<Dispatcher>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    in_gain: i8,
    out_gain: i8,
}

impl<T: DvsiTransport + 'static> AmbeDevice<T> {
    pub fn new(
        transport: T,
        kind: CodecKind,
        class: DeviceClass,
        description: String,
        modules: Vec<char>,
        in_gain: i8,
        out_gain: i8,
    ) -> Arc<Self> {
        let channels = modules.iter().map(|_| {
            let (tx, rx) = unbounded();
            Channel { tx, rx }
        }).collect();

        Arc::new(AmbeDevice {
            transport,
            kind,
            class,
            description,
            modules,
            channels,
            input_queue: Arc::new(FrameQueue::new()),
            buffer_depth: AtomicUsize::new(0),
            keep_running: AtomicBool::new(false),
            dispatcher: OnceLock::new(),
            handles: Mutex::new(Vec::new()),
            in_gain,
            out_gain,
        })
    }

    /// Must be called once, before `start`, so the reader thread can route
    /// finished frames. Mirrors `Frame`'s own set-once fields.
    pub fn bind_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn ratep_vector(&self) -> &'static [u8; 13] {
        match self.kind {
            CodecKind::DStar => &RATEP_DSTAR,
            CodecKind::Dmr => &RATEP_DMR,
            _ => unreachable!("AMBE devices only serve DStar or Dmr"),
        }
    }

    /// Soft reset, disable parity, query PRODID/VERSTRING, then configure
    /// each vocoder channel.
    pub fn init(&self) -> Result<(), DeviceError> {
        let soft_reset = DvsiPacket::encode_control(PKT_RESET, &[PKT_PARITYBYTE, 0x3 ^ PKT_RESET ^ PKT_PARITYBYTE]);
        self.write(&soft_reset)?;
        let resp = self.read_response()?;
        check_control_ack(&resp, PKT_READY, "soft reset", &self.description)?;
        info!("{}: soft reset OK", self.description);

        let parity_off = DvsiPacket::encode_control(
            PKT_PARITYMODE,
            &[0, PKT_PARITYBYTE, 0x4 ^ PKT_PARITYMODE ^ PKT_PARITYBYTE],
        );
        self.write(&parity_off)?;
        let resp = self.read_response()?;
        check_control_ack(&resp, PKT_PARITYMODE, "disable parity", &self.description)?;
        info!("{}: parity disabled", self.description);

        let prodid_req = DvsiPacket::encode_control(PKT_PRODID, &[]);
        self.write(&prodid_req)?;
        let resp = self.read_response()?;
        check_control_ack(&resp, PKT_PRODID, "product id query", &self.description)?;
        let verstring_req = DvsiPacket::encode_control(PKT_VERSTRING, &[]);
        self.write(&verstring_req)?;
        let resp = self.read_response()?;
        check_control_ack(&resp, PKT_VERSTRING, "version query", &self.description)?;
        info!("{}: identified", self.description);

        let ratep = *self.ratep_vector();
        for k in 0..self.channels.len() {
            let field_id = PKT_CHANNEL0 + k as u8;
            let packet = DvsiPacket::encode_vocoder_config(field_id, &ratep, self.in_gain, self.out_gain);
            self.write(&packet)?;
            let resp = self.read_response()?;
            if resp.packet_type != PKT_CONTROL || resp.field_id != field_id || !matches_ack(&resp.payload) {
                warn!(
                    "{}: unexpected vocoder config response:\n{}",
                    self.description,
                    HexDump(&resp.payload)
                );
                return Err(DeviceError::MalformedResponse {
                    description: self.description.clone(),
                    operation: "vocoder config",
                });
            }
            info!(
                "{}: channel {} configured for {}",
                self.description, k, self.kind
            );
        }

        Ok(())
    }

    fn write(&self, buf: &[u8]) -> Result<(), DeviceError> {
        self.transport.write_all(buf).map_err(|e| DeviceError::Io {
            description: self.description.clone(),
            operation: "write",
            reason: e.to_string(),
        })
    }

    fn read_response(&self) -> Result<DvsiPacket, DeviceError> {
        get_response(&self.transport).map_err(|e| DeviceError::Io {
            description: self.description.clone(),
            operation: "read",
            reason: e.to_string(),
        })
    }

    /// Spawns the feeder and reader threads.
    pub fn start(self: &Arc<Self>) {
        self.keep_running.store(true, Ordering::Release);
        let feeder = Arc::clone(self);
        let reader = Arc::clone(self);
        let mut handles = self.handles.lock().expect("handles mutex poisoned");
        handles.push(
            thread::Builder::new()
                .name(format!("{}-feeder", feeder.description))
                .spawn(move || feeder.feeder_loop())
                .expect("spawn feeder thread"),
        );
        handles.push(
            thread::Builder::new()
                .name(format!("{}-reader", reader.description))
                .spawn(move || reader.reader_loop())
                .expect("spawn reader thread"),
        );
    }

    pub fn stop(&self) {
        self.keep_running.store(false, Ordering::Release);
        self.input_queue.shutdown();
        let mut handles = self.handles.lock().expect("handles mutex poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn channel_for(&self, module: char) -> Option<usize> {
        self.modules.iter().position(|m| *m == module)
    }

    fn feeder_loop(&self) {
        while let Some(frame) = self.input_queue.pop() {
            while self.keep_running.load(Ordering::Acquire) && self.buffer_depth.load(Ordering::Acquire) >= BUFFER_DEPTH_LIMIT {
                thread::sleep(FEEDER_BACKOFF);
            }
            if !self.keep_running.load(Ordering::Acquire) {
                break;
            }

            let Some(k) = self.channel_for(frame.module) else {
                warn!("module '{}' is not configured on {}", frame.module, self.description);
                continue;
            };

            let field_id = PKT_CHANNEL0 + k as u8;
            let needs_audio = match self.kind {
                CodecKind::DStar => frame.dstar_is_set(),
                CodecKind::Dmr => frame.dmr_is_set(),
                _ => unreachable!(),
            };

            // Build the request before touching `waiting_packet[k]`: only a
            // frame that is actually about to be sent may be pushed, or the
            // reader's FIFO falls out of alignment with the device's replies.
            let request = if needs_audio {
                let data = match self.kind {
                    CodecKind::DStar => frame.get_dstar(),
                    CodecKind::Dmr => frame.get_dmr(),
                    _ => unreachable!(),
                };
                match data {
                    Some(bytes) => DvsiPacket::encode_channel(field_id, bytes),
                    None => continue,
                }
            } else {
                match frame.get_audio() {
                    Some(pcm) => DvsiPacket::encode_speech(field_id, pcm),
                    None => continue,
                }
            };

            if let Err(e) = self.write(&request) {
                error!("{}: feeder write failed: {e}", self.description);
                continue;
            }

            // Only push to `waiting_packet[k]` once the request has actually
            // gone out: pushing earlier (or unconditionally) would leave an
            // orphaned entry at the head of the channel's FIFO whenever a
            // write fails, permanently misaligning it against the device's
            // replies.
            self.channels[k].tx.send(Arc::clone(&frame)).expect("waiting_packet channel closed");
            self.buffer_depth.fetch_add(1, Ordering::AcqRel);
        }
        trace!("{}: feeder exiting", self.description);
    }

    fn reader_loop(&self) {
        while self.keep_running.load(Ordering::Acquire) {
            let resp = match get_response(&self.transport) {
                Ok(p) => p,
                Err(e) => {
                    if self.keep_running.load(Ordering::Acquire) {
                        warn!("{}: reader read error: {e}", self.description);
                    }
                    continue;
                }
            };

            if resp.packet_type != PKT_SPEECH && resp.packet_type != PKT_CHANNEL {
                continue;
            }
            if resp.field_id < PKT_CHANNEL0 {
                continue;
            }
            let k = (resp.field_id - PKT_CHANNEL0) as usize;
            let Some(channel) = self.channels.get(k) else {
                warn!("{}: response for unknown channel {k}", self.description);
                continue;
            };
            let frame = match channel.rx.recv() {
                Ok(f) => f,
                Err(_) => break,
            };

            let decoded = match resp.packet_type {
                PKT_SPEECH => match resp.decode_speech_payload() {
                    Ok(pcm) => {
                        frame.set_audio(&pcm, false);
                        true
                    }
                    Err(e) => {
                        warn!(
                            "{}: malformed speech response: {e}\n{}",
                            self.description,
                            HexDump(&resp.payload)
                        );
                        false
                    }
                },
                PKT_CHANNEL => match resp.decode_channel_payload() {
                    Ok(data) => {
                        match self.kind {
                            CodecKind::DStar => frame.set_dstar(data),
                            CodecKind::Dmr => frame.set_dmr(data),
                            _ => unreachable!(),
                        }
                        true
                    }
                    Err(e) => {
                        warn!(
                            "{}: malformed channel response: {e}\n{}",
                            self.description,
                            HexDump(&resp.payload)
                        );
                        false
                    }
                },
                _ => unreachable!(),
            };

            // The pending frame is removed from `waiting_packet` and
            // `buffer_depth` is decremented regardless of whether the
            // payload decoded cleanly, so channel alignment and the
            // outstanding-request count survive a malformed response.
            self.buffer_depth.fetch_sub(1, Ordering::AcqRel);

            if !decoded {
                continue;
            }

            if let Some(dispatcher) = self.dispatcher.get() {
                dispatcher.route_ambe_response(frame, self.kind);
            }
        }
        trace!("{}: reader exiting", self.description);
    }
}

impl<T: DvsiTransport + 'static> AmbeSink for AmbeDevice<T> {
    fn add_packet(&self, frame: Arc<Frame>) {
        let len = self.input_queue.push(frame);
        if len > OVERFLOW_LIMIT {
            let err = DeviceError::QueueOverflow { cap: OVERFLOW_LIMIT };
            error!("{}: {err}; terminating", self.description);
            std::process::exit(1);
        }
    }

    fn kind(&self) -> CodecKind {
        self.kind
    }
}

fn matches_ack(payload: &[u8]) -> bool {
    let template = super::protocol::config_ack_template();
    payload.len() >= template.len() && payload[..template.len()] == template
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambe::transport::LoopbackTransport;
    use crate::frame::IngressPayload;

    fn test_device(kind: CodecKind) -> Arc<AmbeDevice<LoopbackTransport>> {
        AmbeDevice::new(
            LoopbackTransport::new(),
            kind,
            DeviceClass::Dv3000,
            format!("{kind} test device"),
            vec!['A'],
            0,
            0,
        )
    }

    #[test]
    fn init_succeeds_against_the_loopback_device() {
        let device = test_device(CodecKind::DStar);
        device.init().expect("loopback init should succeed");
    }

    #[test]
    fn feeder_and_reader_round_trip_a_speech_request() {
        let device = test_device(CodecKind::DStar);
        device.init().expect("init");
        device.start();

        let frame = Arc::new(Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::Usrp,
            IngressPayload::Usrp([0; 160]),
        ));
        let mut pcm = [0i16; 160];
        pcm[0] = 42;
        frame.set_audio(&pcm, false);

        device.add_packet(Arc::clone(&frame));

        for _ in 0..200 {
            if frame.dstar_is_set() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(frame.dstar_is_set(), "frame should have gained a DStar payload");

        device.stop();
    }
}
