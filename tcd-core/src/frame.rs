//! The shared frame object passed between codec workers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Which codec a frame arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    DStar,
    Dmr,
    P25,
    Usrp,
    C2_3200,
    C2_1600,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecKind::DStar => "D-Star",
            CodecKind::Dmr => "DMR/YSF",
            CodecKind::P25 => "P25",
            CodecKind::Usrp => "USRP",
            CodecKind::C2_3200 => "M17/3200",
            CodecKind::C2_1600 => "M17/1600",
        };
        f.write_str(s)
    }
}

pub type DStarPayload = [u8; 9];
pub type DmrPayload = [u8; 9];
pub type P25Payload = [u8; 11];
pub type M17Payload = [u8; 16];
pub type UsrpPayload = [i16; 160];
pub type AudioPayload = [i16; 160];

/// A single 20 ms voice frame, shared across every worker that touches it.
///
/// Payload fields are set-once (`OnceLock`); completion flags and the `sent`
/// guard are atomic. There are no locks: the router's routing rules
/// guarantee no two workers ever target the same field concurrently.
pub struct Frame {
    pub module: char,
    pub stream_id: u16,
    pub sequence: u32,
    pub is_last: bool,
    pub codec_in: CodecKind,

    dstar: OnceLock<DStarPayload>,
    dmr: OnceLock<DmrPayload>,
    p25: OnceLock<P25Payload>,
    m17: OnceLock<M17Payload>,
    usrp: OnceLock<UsrpPayload>,
    audio: OnceLock<AudioPayload>,

    dstar_set: AtomicBool,
    dmr_set: AtomicBool,
    p25_set: AtomicBool,
    m17_set: AtomicBool,

    sent: AtomicBool,
    origin: Instant,
}

impl Frame {
    /// Construct a frame from ingress data, copying the one populated codec
    /// payload and marking its flag.
    pub fn new(
        module: char,
        stream_id: u16,
        sequence: u32,
        is_last: bool,
        codec_in: CodecKind,
        ingress_payload: IngressPayload,
    ) -> Self {
        let frame = Frame {
            module,
            stream_id,
            sequence,
            is_last,
            codec_in,
            dstar: OnceLock::new(),
            dmr: OnceLock::new(),
            p25: OnceLock::new(),
            m17: OnceLock::new(),
            usrp: OnceLock::new(),
            audio: OnceLock::new(),
            dstar_set: AtomicBool::new(false),
            dmr_set: AtomicBool::new(false),
            p25_set: AtomicBool::new(false),
            m17_set: AtomicBool::new(false),
            sent: AtomicBool::new(false),
            origin: Instant::now(),
        };

        match ingress_payload {
            IngressPayload::DStar(b) => {
                let _ = frame.dstar.set(b);
                frame.dstar_set.store(true, Ordering::Release);
            }
            IngressPayload::Dmr(b) => {
                let _ = frame.dmr.set(b);
                frame.dmr_set.store(true, Ordering::Release);
            }
            IngressPayload::P25(b) => {
                let _ = frame.p25.set(b);
                frame.p25_set.store(true, Ordering::Release);
            }
            IngressPayload::Usrp(samples) => {
                let _ = frame.usrp.set(samples);
            }
            IngressPayload::M17(b) => {
                let _ = frame.m17.set(b);
                frame.m17_set.store(true, Ordering::Release);
            }
        }

        frame
    }

    /// True if `sequence` is the second frame of an even/odd pair.
    pub fn is_second(&self) -> bool {
        self.sequence % 2 == 1
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    pub fn get_dstar(&self) -> Option<&DStarPayload> {
        self.dstar.get()
    }

    pub fn get_dmr(&self) -> Option<&DmrPayload> {
        self.dmr.get()
    }

    pub fn get_p25(&self) -> Option<&P25Payload> {
        self.p25.get()
    }

    pub fn get_m17(&self) -> Option<&M17Payload> {
        self.m17.get()
    }

    pub fn get_usrp(&self) -> Option<&UsrpPayload> {
        self.usrp.get()
    }

    pub fn get_audio(&self) -> Option<&AudioPayload> {
        self.audio.get()
    }

    pub fn dstar_is_set(&self) -> bool {
        self.dstar_set.load(Ordering::Acquire)
    }

    pub fn dmr_is_set(&self) -> bool {
        self.dmr_set.load(Ordering::Acquire)
    }

    pub fn p25_is_set(&self) -> bool {
        self.p25_set.load(Ordering::Acquire)
    }

    pub fn m17_is_set(&self) -> bool {
        self.m17_set.load(Ordering::Acquire)
    }

    /// Writes the D-Star AMBE payload and publishes the flag. A no-op once
    /// `sent` has already transitioned true.
    pub fn set_dstar(&self, data: DStarPayload) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let _ = self.dstar.set(data);
        self.dstar_set.store(true, Ordering::Release);
    }

    pub fn set_dmr(&self, data: DmrPayload) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let _ = self.dmr.set(data);
        self.dmr_set.store(true, Ordering::Release);
    }

    pub fn set_p25(&self, data: P25Payload) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let _ = self.p25.set(data);
        self.p25_set.store(true, Ordering::Release);
    }

    pub fn set_m17(&self, data: M17Payload) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let _ = self.m17.set(data);
        self.m17_set.store(true, Ordering::Release);
    }

    pub fn set_usrp(&self, samples: UsrpPayload) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let _ = self.usrp.set(samples);
    }

    /// Writes PCM audio, optionally byte-swapping each sample from network
    /// order; the device boundary is the only place `swap_bytes` is `true`.
    pub fn set_audio(&self, samples: &[i16; 160], swap_bytes: bool) {
        if self.sent.load(Ordering::Acquire) {
            return;
        }
        let mut out = [0i16; 160];
        if swap_bytes {
            for (o, s) in out.iter_mut().zip(samples.iter()) {
                *o = s.swap_bytes();
            }
        } else {
            out.copy_from_slice(samples);
        }
        let _ = self.audio.set(out);
    }

    /// True iff every flag in the target set (D-Star, DMR, P25, M17) is set.
    pub fn all_codecs_set(&self) -> bool {
        self.dstar_is_set() && self.dmr_is_set() && self.p25_is_set() && self.m17_is_set()
    }

    /// Atomically transitions `sent` false -> true, returning the previous
    /// value so the caller can detect a no-op second call.
    pub fn mark_sent(&self) -> bool {
        self.sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    }

    pub fn has_been_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// One-line structured trace of this frame's codec-completion state,
    /// useful for router and device logs.
    pub fn trace_line(&self) -> String {
        let mut s = format!(
            "mod='{}' sid={:#06x} seq={} et={:.3}ms",
            self.module, self.stream_id, self.sequence, self.elapsed_ms()
        );
        if self.dstar_is_set() {
            s.push_str(" DStar");
            if matches!(self.codec_in, CodecKind::DStar) {
                s.push('*');
            }
        }
        if self.dmr_is_set() {
            s.push_str(" DMR");
            if matches!(self.codec_in, CodecKind::Dmr) {
                s.push('*');
            }
        }
        if self.m17_is_set() {
            s.push_str(" M17");
            match self.codec_in {
                CodecKind::C2_1600 => s.push_str("**"),
                CodecKind::C2_3200 => s.push('*'),
                _ => {}
            }
        }
        if self.p25_is_set() {
            s.push_str(" P25");
            if matches!(self.codec_in, CodecKind::P25) {
                s.push('*');
            }
        }
        if self.is_second() {
            s.push_str(" second");
        }
        if self.is_last {
            s.push_str(" last");
        }
        s
    }
}

/// The one payload populated by the reflector on ingress.
pub enum IngressPayload {
    DStar(DStarPayload),
    Dmr(DmrPayload),
    P25(P25Payload),
    Usrp(UsrpPayload),
    M17(M17Payload),
}

/// The Codec2-3200 "silence frame", used literally as the second half of
/// M17 output on odd-terminated streams.
pub const M17_SILENCE_HALF: [u8; 8] = [0x00, 0x01, 0x43, 0x09, 0xe4, 0x9c, 0x08, 0x21];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_only_the_ingress_codec_flag() {
        let f = Frame::new(
            'A',
            0x1234,
            0,
            false,
            CodecKind::DStar,
            IngressPayload::DStar([1, 2, 3, 4, 5, 6, 7, 8, 9]),
        );
        assert!(f.dstar_is_set());
        assert!(!f.dmr_is_set());
        assert!(!f.p25_is_set());
        assert!(!f.m17_is_set());
        assert!(!f.all_codecs_set());
        assert_eq!(f.get_dstar().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn all_codecs_set_requires_all_four_flags() {
        let f = Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::DStar,
            IngressPayload::DStar([0; 9]),
        );
        f.set_dmr([0; 9]);
        f.set_p25([0; 11]);
        assert!(!f.all_codecs_set());
        f.set_m17([0; 16]);
        assert!(f.all_codecs_set());
    }

    #[test]
    fn mark_sent_is_idempotent() {
        let f = Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::Usrp,
            IngressPayload::Usrp([0; 160]),
        );
        assert!(!f.mark_sent());
        assert!(f.has_been_sent());
        assert!(f.mark_sent(), "second call must report already-sent");
    }

    #[test]
    fn writes_after_sent_are_dropped() {
        let f = Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::DStar,
            IngressPayload::DStar([9; 9]),
        );
        f.mark_sent();
        f.set_dmr([1; 9]);
        assert!(!f.dmr_is_set());
        assert!(f.get_dmr().is_none());
    }

    #[test]
    fn set_audio_byte_swaps_only_when_requested() {
        let f = Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::Usrp,
            IngressPayload::Usrp([0; 160]),
        );
        let mut samples = [0i16; 160];
        samples[0] = 0x0102;
        f.set_audio(&samples, true);
        assert_eq!(f.get_audio().unwrap()[0], 0x0201);

        let f2 = Frame::new(
            'A',
            0,
            0,
            false,
            CodecKind::Usrp,
            IngressPayload::Usrp([0; 160]),
        );
        f2.set_audio(&samples, false);
        assert_eq!(f2.get_audio().unwrap()[0], 0x0102);
    }

    #[test]
    fn sequence_parity_determines_second() {
        let even = Frame::new(
            'A',
            0,
            4,
            false,
            CodecKind::C2_3200,
            IngressPayload::M17([0; 16]),
        );
        let odd = Frame::new(
            'A',
            0,
            5,
            false,
            CodecKind::C2_3200,
            IngressPayload::M17([0; 16]),
        );
        assert!(!even.is_second());
        assert!(odd.is_second());
    }
}
