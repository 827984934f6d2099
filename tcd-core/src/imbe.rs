//! IMBE (P25 Phase-1) software worker.

use std::sync::Arc;

use log::{trace, warn};

use crate::frame::{CodecKind, Frame, P25Payload};
use crate::router::Dispatcher;

/// Adapter onto the external IMBE vocoder library.
pub trait ImbeVocoder: Send + Sync {
    /// Decodes an 11-byte (88-bit) IMBE frame into 160 PCM samples.
    fn decode(&self, data: &P25Payload) -> [i16; 160];
    /// Encodes 160 PCM samples into an 11-byte IMBE frame.
    fn encode(&self, pcm: &[i16; 160]) -> P25Payload;
}

pub struct ImbeWorker {
    vocoder: Arc<dyn ImbeVocoder>,
    dispatcher: Arc<Dispatcher>,
}

impl ImbeWorker {
    pub fn new(vocoder: Arc<dyn ImbeVocoder>, dispatcher: Arc<Dispatcher>) -> Self {
        ImbeWorker { vocoder, dispatcher }
    }

    pub fn run(self) {
        let queue = Arc::clone(&self.dispatcher.imbe_queue);
        while let Some(frame) = queue.pop() {
            if matches!(frame.codec_in, CodecKind::P25) {
                self.decode_to_audio(&frame);
            } else {
                self.encode_from_audio(&frame);
            }
        }
        trace!("imbe worker exiting");
    }

    fn decode_to_audio(&self, frame: &Arc<Frame>) {
        let data = frame.get_p25().expect("p25 payload set on ingress");
        let pcm = self.vocoder.decode(data);
        frame.set_audio(&pcm, false);
        self.dispatcher.fan_out_from_imbe(Arc::clone(frame));
    }

    fn encode_from_audio(&self, frame: &Arc<Frame>) {
        let pcm = match frame.get_audio() {
            Some(p) => p,
            None => {
                warn!("imbe encode: frame has no PCM yet ({})", frame.trace_line());
                return;
            }
        };
        frame.set_p25(self.vocoder.encode(pcm));
        self.dispatcher.maybe_deliver(frame);
    }
}
