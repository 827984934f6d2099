//! Router / controller: ingress, the fan-out routing table, and
//! exactly-once delivery back to the reflector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::codec2::{Codec2Vocoder, Codec2Worker};
use crate::config::TcdConfig;
use crate::errors::DeviceError;
use crate::frame::{CodecKind, Frame};
use crate::imbe::{ImbeVocoder, ImbeWorker};
use crate::queue::{FrameQueue, OVERFLOW_LIMIT};
use crate::socket::ReflectorSocket;
use crate::usrp::UsrpWorker;

/// Narrow interface an AMBE device (or its software fallback) exposes to the
/// router.
pub trait AmbeSink: Send + Sync {
    fn add_packet(&self, frame: Arc<Frame>);
    /// The codec this sink produces/consumes (DStar or Dmr).
    fn kind(&self) -> CodecKind;
}

/// Everything a worker needs to route a completed or partial frame onward.
/// Shared by value (`Arc<Dispatcher>`) across every worker thread.
pub struct Dispatcher {
    pub codec2_queue: Arc<FrameQueue>,
    pub imbe_queue: Arc<FrameQueue>,
    pub usrp_queue: Arc<FrameQueue>,
    dstar_sink: Arc<dyn AmbeSink>,
    dmr_sink: Arc<dyn AmbeSink>,
    egress: Arc<ReflectorSocket>,
    send_mux: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        codec2_queue: Arc<FrameQueue>,
        imbe_queue: Arc<FrameQueue>,
        usrp_queue: Arc<FrameQueue>,
        dstar_sink: Arc<dyn AmbeSink>,
        dmr_sink: Arc<dyn AmbeSink>,
        egress: Arc<ReflectorSocket>,
    ) -> Self {
        Dispatcher {
            codec2_queue,
            imbe_queue,
            usrp_queue,
            dstar_sink,
            dmr_sink,
            egress,
            send_mux: Mutex::new(()),
        }
    }

    /// Pushes onto a worker queue and enforces the same overflow backstop
    /// the AMBE sinks apply: a lost worker thread must not let its queue
    /// grow without bound.
    fn push_checked(&self, queue: &FrameQueue, label: &str, frame: Arc<Frame>) {
        let len = queue.push(frame);
        if len > OVERFLOW_LIMIT {
            let err = DeviceError::QueueOverflow { cap: OVERFLOW_LIMIT };
            error!("{label} queue: {err}; terminating");
            std::process::exit(1);
        }
    }

    /// Ingress fan-out: the one queue/sink whose codec matches `codec_in`.
    pub fn route_ingress(&self, frame: Arc<Frame>) {
        match frame.codec_in {
            CodecKind::DStar => self.dstar_sink.add_packet(frame),
            CodecKind::Dmr => self.dmr_sink.add_packet(frame),
            CodecKind::P25 => {
                self.push_checked(&self.imbe_queue, "imbe", frame);
            }
            CodecKind::Usrp => {
                self.push_checked(&self.usrp_queue, "usrp", frame);
            }
            CodecKind::C2_3200 | CodecKind::C2_1600 => {
                self.push_checked(&self.codec2_queue, "codec2", frame);
            }
        }
    }

    pub fn fan_out_from_dstar(&self, frame: Arc<Frame>) {
        self.push_checked(&self.imbe_queue, "imbe", Arc::clone(&frame));
        self.push_checked(&self.usrp_queue, "usrp", Arc::clone(&frame));
        self.push_checked(&self.codec2_queue, "codec2", Arc::clone(&frame));
        self.dmr_sink.add_packet(frame);
    }

    pub fn fan_out_from_dmr(&self, frame: Arc<Frame>) {
        self.push_checked(&self.imbe_queue, "imbe", Arc::clone(&frame));
        self.push_checked(&self.usrp_queue, "usrp", Arc::clone(&frame));
        self.push_checked(&self.codec2_queue, "codec2", Arc::clone(&frame));
        self.dstar_sink.add_packet(frame);
    }

    pub fn fan_out_from_imbe(&self, frame: Arc<Frame>) {
        self.push_checked(&self.codec2_queue, "codec2", Arc::clone(&frame));
        self.push_checked(&self.usrp_queue, "usrp", Arc::clone(&frame));
        self.dstar_sink.add_packet(Arc::clone(&frame));
        self.dmr_sink.add_packet(frame);
    }

    pub fn fan_out_from_usrp(&self, frame: Arc<Frame>) {
        self.push_checked(&self.codec2_queue, "codec2", Arc::clone(&frame));
        self.push_checked(&self.imbe_queue, "imbe", Arc::clone(&frame));
        self.dstar_sink.add_packet(Arc::clone(&frame));
        self.dmr_sink.add_packet(frame);
    }

    pub fn fan_out_from_codec2(&self, frame: Arc<Frame>) {
        self.push_checked(&self.imbe_queue, "imbe", Arc::clone(&frame));
        self.push_checked(&self.usrp_queue, "usrp", Arc::clone(&frame));
        self.dstar_sink.add_packet(Arc::clone(&frame));
        self.dmr_sink.add_packet(frame);
    }

    /// Called by an AMBE device's reader thread once a response has been
    /// written into the frame.
    pub fn route_ambe_response(&self, frame: Arc<Frame>, device_kind: CodecKind) {
        if frame.codec_in == device_kind {
            match device_kind {
                CodecKind::DStar => self.fan_out_from_dstar(frame),
                CodecKind::Dmr => self.fan_out_from_dmr(frame),
                _ => unreachable!("AMBE devices only produce DStar or Dmr"),
            }
        } else {
            self.maybe_deliver(&frame);
        }
    }

    pub fn maybe_deliver(&self, frame: &Arc<Frame>) {
        if frame.all_codecs_set() {
            self.send_to_reflector(frame);
        }
    }

    fn send_to_reflector(&self, frame: &Arc<Frame>) {
        if frame.mark_sent() {
            return;
        }
        let _guard = self.send_mux.lock().expect("send mutex poisoned");
        if let Err(e) = self.egress.send(frame) {
            warn!(
                "failed to deliver completed frame ({}): {e}",
                frame.trace_line()
            );
        } else {
            trace!("delivered frame: {}", frame.trace_line());
        }
    }
}

/// Owns the thread set and the queues; the top-level lifecycle object.
/// Generic over the codec/vocoder adapters so the core stays decoupled from
/// any concrete third-party implementation.
pub struct Router {
    dispatcher: Arc<Dispatcher>,
    ingress: Arc<ReflectorSocket>,
    keep_running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Router {
    /// Builds the dispatcher and worker queues. AMBE sinks are supplied
    /// fully constructed (hardware device or software fallback) by the
    /// caller, which owns the FTDI/codec library bindings.
    pub fn new(
        ingress: Arc<ReflectorSocket>,
        dstar_sink: Arc<dyn AmbeSink>,
        dmr_sink: Arc<dyn AmbeSink>,
    ) -> Self {
        let codec2_queue = Arc::new(FrameQueue::new());
        let imbe_queue = Arc::new(FrameQueue::new());
        let usrp_queue = Arc::new(FrameQueue::new());

        let dispatcher = Arc::new(Dispatcher::new(
            codec2_queue,
            imbe_queue,
            usrp_queue,
            dstar_sink,
            dmr_sink,
            Arc::clone(&ingress),
        ));

        Router {
            dispatcher,
            ingress,
            keep_running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Spawns the codec2/IMBE/USRP worker threads and the ingress thread.
    /// AMBE device threads are spawned by their own driver and are not
    /// owned here.
    pub fn start(
        &mut self,
        config: Arc<TcdConfig>,
        codec2_vocoder: Arc<dyn Codec2Vocoder>,
        imbe_vocoder: Arc<dyn ImbeVocoder>,
    ) {
        self.keep_running.store(true, Ordering::Release);

        {
            let worker = Codec2Worker::new(codec2_vocoder, self.dispatcher());
            self.handles
                .push(thread::Builder::new().name("codec2".into()).spawn(move || worker.run()).expect("spawn codec2 thread"));
        }
        {
            let worker = ImbeWorker::new(imbe_vocoder, self.dispatcher());
            self.handles
                .push(thread::Builder::new().name("imbe".into()).spawn(move || worker.run()).expect("spawn imbe thread"));
        }
        {
            let worker = UsrpWorker::new(config.gains.usrp_tx, config.gains.usrp_rx, self.dispatcher());
            self.handles
                .push(thread::Builder::new().name("usrp".into()).spawn(move || worker.run()).expect("spawn usrp thread"));
        }
        {
            let ingress = Arc::clone(&self.ingress);
            let dispatcher = self.dispatcher();
            let keep_running = Arc::clone(&self.keep_running);
            self.handles.push(
                thread::Builder::new()
                    .name("ingress".into())
                    .spawn(move || Self::ingress_loop(ingress, dispatcher, keep_running))
                    .expect("spawn ingress thread"),
            );
        }

        info!("router started with modules {:?}", config.modules);
    }

    /// Blocks reading datagrams, 100 ms read timeout, until `keep_running`
    /// is cleared.
    fn ingress_loop(ingress: Arc<ReflectorSocket>, dispatcher: Arc<Dispatcher>, keep_running: Arc<AtomicBool>) {
        const READ_TIMEOUT: Duration = Duration::from_millis(100);
        while keep_running.load(Ordering::Acquire) {
            match ingress.recv(READ_TIMEOUT) {
                Ok(Some(frame)) => {
                    debug!("ingress: {}", frame.trace_line());
                    dispatcher.route_ingress(Arc::new(frame));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!("ingress read error: {e}");
                }
            }
        }
        trace!("ingress thread exiting");
    }

    /// Stops all queues, joins every worker thread, closes the ingress
    /// socket. AMBE devices are stopped separately by their owner.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        self.dispatcher.codec2_queue.shutdown();
        self.dispatcher.imbe_queue.shutdown();
        self.dispatcher.usrp_queue.shutdown();
        self.ingress.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        info!("router stopped");
    }
}
