//! M17/Codec2 worker. The Codec2 implementation itself (modes 3200 & 1600)
//! is a third-party library the core consumes through the narrow
//! `Codec2Vocoder` adapter interface.

use std::collections::HashMap;
use std::sync::Arc;

use log::{trace, warn};

use crate::frame::{CodecKind, Frame, M17_SILENCE_HALF};
use crate::router::Dispatcher;

/// Adapter interface onto the external Codec2 library.
pub trait Codec2Vocoder: Send + Sync {
    /// Decodes one 8-byte mode-3200 half into 160 PCM samples.
    fn decode_3200(&self, half: &[u8; 8]) -> [i16; 160];
    /// Encodes 160 PCM samples into one 8-byte mode-3200 half.
    fn encode_3200(&self, pcm: &[i16; 160]) -> [u8; 8];
    /// Decodes one 8-byte mode-1600 payload into 320 PCM samples (40 ms).
    fn decode_1600(&self, bytes: &[u8; 8]) -> [i16; 320];
}

/// Single-threaded worker; `audio_store`/`data_store` need no synchronization
/// because only this thread ever touches them.
pub struct Codec2Worker {
    vocoder: Arc<dyn Codec2Vocoder>,
    dispatcher: Arc<Dispatcher>,
    audio_store: HashMap<char, [i16; 160]>,
    data_store: HashMap<char, [u8; 8]>,
}

impl Codec2Worker {
    pub fn new(vocoder: Arc<dyn Codec2Vocoder>, dispatcher: Arc<Dispatcher>) -> Self {
        Codec2Worker {
            vocoder,
            dispatcher,
            audio_store: HashMap::new(),
            data_store: HashMap::new(),
        }
    }

    /// Runs until the codec2 queue shuts down.
    pub fn run(mut self) {
        let queue = Arc::clone(&self.dispatcher.codec2_queue);
        while let Some(frame) = queue.pop() {
            match frame.codec_in {
                CodecKind::C2_3200 | CodecKind::C2_1600 => self.codec2_to_audio(&frame),
                CodecKind::DStar | CodecKind::Dmr | CodecKind::P25 | CodecKind::Usrp => {
                    self.audio_to_codec2(&frame)
                }
            }
        }
        trace!("codec2 worker exiting");
    }

    /// M17 -> PCM. Fans the resulting PCM out to both AMBE devices, IMBE,
    /// and USRP.
    fn codec2_to_audio(&mut self, frame: &Arc<Frame>) {
        if frame.is_second() {
            match frame.codec_in {
                CodecKind::C2_1600 => {
                    let stashed = *self.audio_store.get(&frame.module).unwrap_or(&[0i16; 160]);
                    frame.set_audio(&stashed, false);
                }
                CodecKind::C2_3200 => {
                    let half: [u8; 8] = frame.get_m17().expect("m17 payload set on ingress")[8..16]
                        .try_into()
                        .unwrap();
                    let pcm = self.vocoder.decode_3200(&half);
                    frame.set_audio(&pcm, false);
                }
                _ => unreachable!(),
            }
        } else {
            match frame.codec_in {
                CodecKind::C2_1600 => {
                    let bytes: [u8; 8] = frame.get_m17().expect("m17 payload set on ingress")[0..8]
                        .try_into()
                        .unwrap();
                    let decoded = self.vocoder.decode_1600(&bytes);
                    let first: [i16; 160] = decoded[0..160].try_into().unwrap();
                    let second: [i16; 160] = decoded[160..320].try_into().unwrap();
                    frame.set_audio(&first, false);
                    self.audio_store.insert(frame.module, second);
                }
                CodecKind::C2_3200 => {
                    let half: [u8; 8] = frame.get_m17().expect("m17 payload set on ingress")[0..8]
                        .try_into()
                        .unwrap();
                    let pcm = self.vocoder.decode_3200(&half);
                    frame.set_audio(&pcm, false);
                }
                _ => unreachable!(),
            }
        }
        self.dispatcher.fan_out_from_codec2(Arc::clone(frame));
    }

    /// AMBE/P25/USRP -> M17. Mode 1600 is never used on egress; all
    /// outgoing M17 is mode 3200.
    fn audio_to_codec2(&mut self, frame: &Arc<Frame>) {
        let pcm = match frame.get_audio() {
            Some(p) => p,
            None => {
                warn!(
                    "audio_to_codec2: frame has no PCM yet ({})",
                    frame.trace_line()
                );
                return;
            }
        };

        let mut m17 = [0u8; 16];
        m17[8..16].copy_from_slice(&M17_SILENCE_HALF);

        if frame.is_second() {
            let first = *self.data_store.get(&frame.module).unwrap_or(&[0u8; 8]);
            m17[0..8].copy_from_slice(&first);
            let second = self.vocoder.encode_3200(pcm);
            m17[8..16].copy_from_slice(&second);
        } else {
            let first = self.vocoder.encode_3200(pcm);
            self.data_store.insert(frame.module, first);
            m17[0..8].copy_from_slice(&first);
        }

        frame.set_m17(m17);
        self.dispatcher.maybe_deliver(frame);
    }
}
