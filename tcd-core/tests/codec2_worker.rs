//! Exercises the Codec2/M17 worker end to end against stub vocoders,
//! covering the even/odd half-frame split and the M17 silence sentinel.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tcd_core::codec2::{Codec2Vocoder, Codec2Worker};
use tcd_core::frame::{CodecKind, Frame, IngressPayload, M17_SILENCE_HALF};
use tcd_core::router::{AmbeSink, Dispatcher, Router};
use tcd_core::socket::ReflectorSocket;

struct IdentityCodec2;

impl Codec2Vocoder for IdentityCodec2 {
    fn decode_3200(&self, half: &[u8; 8]) -> [i16; 160] {
        let mut out = [0i16; 160];
        out[0] = half[0] as i16;
        out
    }

    fn encode_3200(&self, pcm: &[i16; 160]) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = pcm[0] as u8;
        out
    }

    fn decode_1600(&self, bytes: &[u8; 8]) -> [i16; 320] {
        let mut out = [0i16; 320];
        out[0] = bytes[0] as i16;
        out[160] = bytes[1] as i16;
        out
    }
}

/// Records whatever frames are fanned out to it instead of touching real
/// hardware or a socket.
struct RecordingSink {
    kind: CodecKind,
    seen: Mutex<Vec<Arc<Frame>>>,
}

impl RecordingSink {
    fn new(kind: CodecKind) -> Arc<Self> {
        Arc::new(RecordingSink {
            kind,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl AmbeSink for RecordingSink {
    fn add_packet(&self, frame: Arc<Frame>) {
        self.seen.lock().unwrap().push(frame);
    }

    fn kind(&self) -> CodecKind {
        self.kind
    }
}

fn test_dir(tag: &str) -> String {
    format!("/tmp/tcd_codec2_test_{tag}_{}", std::process::id())
}

fn dispatcher_harness(tag: &str) -> Arc<Dispatcher> {
    let dir = test_dir(tag);
    std::fs::create_dir_all(&dir).unwrap();
    let ingress = Arc::new(ReflectorSocket::bind(&dir).unwrap());
    let dstar = RecordingSink::new(CodecKind::DStar);
    let dmr = RecordingSink::new(CodecKind::Dmr);
    let router = Router::new(ingress, dstar, dmr);
    router.dispatcher()
}

#[test]
fn mode_1600_even_frame_stashes_second_half_for_the_odd_frame() {
    let dispatcher = dispatcher_harness("mode1600");
    let worker = Codec2Worker::new(Arc::new(IdentityCodec2), Arc::clone(&dispatcher));
    let handle = thread::spawn(move || worker.run());

    let even = Arc::new(Frame::new(
        'A',
        1,
        0,
        false,
        CodecKind::C2_1600,
        IngressPayload::M17([7, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
    ));
    dispatcher.codec2_queue.push(even);
    thread::sleep(Duration::from_millis(50));

    let odd = Arc::new(Frame::new(
        'A',
        1,
        1,
        true,
        CodecKind::C2_1600,
        IngressPayload::M17([0; 16]),
    ));
    dispatcher.codec2_queue.push(Arc::clone(&odd));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(odd.get_audio().unwrap()[0], 9, "odd frame should see the stashed second half");

    dispatcher.codec2_queue.shutdown();
    let _ = handle.join();
}

#[test]
fn audio_to_codec2_fills_the_tail_with_the_silence_sentinel() {
    let dispatcher = dispatcher_harness("silence");
    let worker = Codec2Worker::new(Arc::new(IdentityCodec2), Arc::clone(&dispatcher));
    let handle = thread::spawn(move || worker.run());

    let frame = Arc::new(Frame::new(
        'A',
        2,
        0,
        true, // odd-terminated stream's last frame is the "first half" only
        CodecKind::DStar,
        IngressPayload::DStar([0; 9]),
    ));
    frame.set_audio(&[0i16; 160], false);
    dispatcher.codec2_queue.push(Arc::clone(&frame));
    thread::sleep(Duration::from_millis(50));

    let m17 = frame.get_m17().expect("m17 half should be set");
    assert_eq!(&m17[8..16], &M17_SILENCE_HALF);

    dispatcher.codec2_queue.shutdown();
    let _ = handle.join();
}
