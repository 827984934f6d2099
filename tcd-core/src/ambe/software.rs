//! Software AMBE fallback: a software vocoder standing in for the second
//! hardware DVSI device when only one is attached. Routes identically to
//! `AmbeDevice` from the rest of the system's point of view.

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use log::{trace, warn};

use crate::frame::{CodecKind, DStarPayload, DmrPayload, Frame};
use crate::queue::{FrameQueue, OVERFLOW_LIMIT};
use crate::router::{AmbeSink, Dispatcher};

/// Adapter onto a third-party software AMBE vocoder; same shape as
/// `Codec2Vocoder`/`ImbeVocoder`.
pub trait SoftwareAmbeCodec: Send + Sync {
    fn encode_dstar(&self, pcm: &[i16; 160]) -> DStarPayload;
    fn decode_dstar(&self, data: &DStarPayload) -> [i16; 160];
    fn encode_dmr(&self, pcm: &[i16; 160]) -> DmrPayload;
    fn decode_dmr(&self, data: &DmrPayload) -> [i16; 160];
}

pub struct SoftwareAmbeWorker {
    kind: CodecKind,
    codec: Arc<dyn SoftwareAmbeCodec>,
    queue: Arc<FrameQueue>,
    dispatcher: OnceLock<Arc<Dispatcher>>,
}

impl SoftwareAmbeWorker {
    pub fn new(kind: CodecKind, codec: Arc<dyn SoftwareAmbeCodec>) -> Arc<Self> {
        assert!(
            matches!(kind, CodecKind::DStar | CodecKind::Dmr),
            "software AMBE fallback only replaces the DStar or Dmr engine"
        );
        Arc::new(SoftwareAmbeWorker {
            kind,
            codec,
            queue: Arc::new(FrameQueue::new()),
            dispatcher: OnceLock::new(),
        })
    }

    pub fn bind_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        thread::Builder::new()
            .name(format!("sw-ambe-{}", worker.kind))
            .spawn(move || worker.run())
            .expect("spawn software AMBE thread")
    }

    pub fn stop(&self) {
        self.queue.shutdown();
    }

    fn run(&self) {
        while let Some(frame) = self.queue.pop() {
            let needs_audio = match self.kind {
                CodecKind::DStar => frame.dstar_is_set(),
                CodecKind::Dmr => frame.dmr_is_set(),
                _ => unreachable!(),
            };

            if needs_audio {
                match self.kind {
                    CodecKind::DStar => {
                        if let Some(data) = frame.get_dstar() {
                            let pcm = self.codec.decode_dstar(data);
                            frame.set_audio(&pcm, false);
                        }
                    }
                    CodecKind::Dmr => {
                        if let Some(data) = frame.get_dmr() {
                            let pcm = self.codec.decode_dmr(data);
                            frame.set_audio(&pcm, false);
                        }
                    }
                    _ => unreachable!(),
                }
            } else {
                match frame.get_audio() {
                    Some(pcm) => match self.kind {
                        CodecKind::DStar => frame.set_dstar(self.codec.encode_dstar(pcm)),
                        CodecKind::Dmr => frame.set_dmr(self.codec.encode_dmr(pcm)),
                        _ => unreachable!(),
                    },
                    None => {
                        warn!("software AMBE worker: frame has no PCM yet ({})", frame.trace_line());
                        continue;
                    }
                }
            }

            if let Some(dispatcher) = self.dispatcher.get() {
                dispatcher.route_ambe_response(frame, self.kind);
            }
        }
        trace!("software AMBE worker ({}) exiting", self.kind);
    }
}

impl AmbeSink for SoftwareAmbeWorker {
    fn add_packet(&self, frame: Arc<Frame>) {
        let len = self.queue.push(frame);
        if len > OVERFLOW_LIMIT {
            let err = crate::errors::DeviceError::QueueOverflow { cap: OVERFLOW_LIMIT };
            log::error!("software AMBE ({}): {err}; terminating", self.kind);
            std::process::exit(1);
        }
    }

    fn kind(&self) -> CodecKind {
        self.kind
    }
}
