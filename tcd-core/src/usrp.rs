//! USRP linear-PCM bridge worker: integer gain scaling only, no codec
//! involved.

use std::sync::Arc;

use log::{trace, warn};

use crate::frame::{CodecKind, Frame};
use crate::router::Dispatcher;

/// `numerator = round(256 * 10^(gain_db/20))`. Computed once at
/// construction since the configured gain never changes at runtime.
fn gain_numerator(gain_db: i32) -> i64 {
    let factor = 256.0_f64 * 10f64.powf(gain_db as f64 / 20.0);
    factor.round() as i64
}

/// `sample_out = (sample_in * numerator) >> 8`; wraps modulo on overflow,
/// clipping is deliberately not performed.
fn scale(sample: i16, numerator: i64) -> i16 {
    let scaled = (sample as i64 * numerator) >> 8;
    scaled as i16
}

pub struct UsrpWorker {
    tx_numerator: i64,
    rx_numerator: i64,
    dispatcher: Arc<Dispatcher>,
}

impl UsrpWorker {
    pub fn new(tx_gain_db: i32, rx_gain_db: i32, dispatcher: Arc<Dispatcher>) -> Self {
        UsrpWorker {
            tx_numerator: gain_numerator(tx_gain_db),
            rx_numerator: gain_numerator(rx_gain_db),
            dispatcher,
        }
    }

    pub fn run(self) {
        let queue = Arc::clone(&self.dispatcher.usrp_queue);
        while let Some(frame) = queue.pop() {
            if matches!(frame.codec_in, CodecKind::Usrp) {
                self.usrp_to_audio(&frame);
            } else {
                self.audio_to_usrp(&frame);
            }
        }
        trace!("usrp worker exiting");
    }

    /// USRP (ingress PCM) -> working PCM, scaled by the rx gain.
    fn usrp_to_audio(&self, frame: &Arc<Frame>) {
        let samples = frame.get_usrp().expect("usrp payload set on ingress");
        let mut scaled = [0i16; 160];
        for (o, s) in scaled.iter_mut().zip(samples.iter()) {
            *o = scale(*s, self.rx_numerator);
        }
        frame.set_audio(&scaled, false);
        self.dispatcher.fan_out_from_usrp(Arc::clone(frame));
    }

    /// Working PCM -> USRP field, scaled by the tx gain.
    fn audio_to_usrp(&self, frame: &Arc<Frame>) {
        let pcm = match frame.get_audio() {
            Some(p) => p,
            None => {
                warn!("usrp encode: frame has no PCM yet ({})", frame.trace_line());
                return;
            }
        };
        let mut scaled = [0i16; 160];
        for (o, s) in scaled.iter_mut().zip(pcm.iter()) {
            *o = scale(*s, self.tx_numerator);
        }
        frame.set_usrp(scaled);
        self.dispatcher.maybe_deliver(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_is_identity() {
        assert_eq!(gain_numerator(0), 256);
        assert_eq!(scale(1000, 256), 1000);
        assert_eq!(scale(-1000, 256), -1000);
    }

    #[test]
    fn positive_gain_amplifies() {
        // +6dB ~= numerator 511 (256 * 10^0.3 ~= 510.9)
        let n = gain_numerator(6);
        assert!((509..=512).contains(&n));
        assert!(scale(1000, n) > 1000);
    }

    #[test]
    fn negative_gain_attenuates() {
        let n = gain_numerator(-6);
        assert!(scale(1000, n) < 1000);
    }
}
