//! Reflector round-trip over Unix-domain datagram sockets: the core binds
//! one server socket (`REF2TC`) and opens one client socket per module
//! (`TC2REF<module>`).

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::sync::Mutex;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use crate::frame::{CodecKind, Frame, IngressPayload};

const MAX_DATAGRAM: usize = 512;

/// Fixed 9-byte header shared by every datagram direction (the frame's
/// essential attributes, minus the payload).
struct Header {
    module: char,
    stream_id: u16,
    sequence: u32,
    is_last: bool,
}

impl Header {
    const LEN: usize = 8;

    fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.module as u8);
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, self.stream_id);
        buf.extend_from_slice(&tmp);
        let mut tmp4 = [0u8; 4];
        BigEndian::write_u32(&mut tmp4, self.sequence);
        buf.extend_from_slice(&tmp4);
        buf.push(u8::from(self.is_last));
    }

    fn read(buf: &[u8]) -> io::Result<Header> {
        if buf.len() < Header::LEN {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short header"));
        }
        Ok(Header {
            module: buf[0] as char,
            stream_id: BigEndian::read_u16(&buf[1..3]),
            sequence: BigEndian::read_u32(&buf[3..7]),
            is_last: buf[7] != 0,
        })
    }
}

fn codec_tag(kind: CodecKind) -> u8 {
    match kind {
        CodecKind::DStar => 0,
        CodecKind::Dmr => 1,
        CodecKind::P25 => 2,
        CodecKind::Usrp => 3,
        CodecKind::C2_3200 => 4,
        CodecKind::C2_1600 => 5,
    }
}

fn codec_from_tag(tag: u8) -> io::Result<CodecKind> {
    Ok(match tag {
        0 => CodecKind::DStar,
        1 => CodecKind::Dmr,
        2 => CodecKind::P25,
        3 => CodecKind::Usrp,
        4 => CodecKind::C2_3200,
        5 => CodecKind::C2_1600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown codec tag {other}"),
            ))
        }
    })
}

/// Decodes one ingress datagram: header, a codec tag, then that codec's
/// single payload -- only `codec_in`'s field exists at ingress.
fn decode_ingress(buf: &[u8]) -> io::Result<Frame> {
    let header = Header::read(buf)?;
    let rest = &buf[Header::LEN..];
    if rest.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "missing codec tag"));
    }
    let codec_in = codec_from_tag(rest[0])?;
    let payload = &rest[1..];

    let ingress = match codec_in {
        CodecKind::DStar => {
            let b: [u8; 9] = payload
                .get(0..9)
                .ok_or_else(short_payload)?
                .try_into()
                .unwrap();
            IngressPayload::DStar(b)
        }
        CodecKind::Dmr => {
            let b: [u8; 9] = payload
                .get(0..9)
                .ok_or_else(short_payload)?
                .try_into()
                .unwrap();
            IngressPayload::Dmr(b)
        }
        CodecKind::P25 => {
            let b: [u8; 11] = payload
                .get(0..11)
                .ok_or_else(short_payload)?
                .try_into()
                .unwrap();
            IngressPayload::P25(b)
        }
        CodecKind::Usrp => {
            let bytes = payload.get(0..320).ok_or_else(short_payload)?;
            let mut samples = [0i16; 160];
            for (i, s) in samples.iter_mut().enumerate() {
                *s = BigEndian::read_i16(&bytes[i * 2..i * 2 + 2]);
            }
            IngressPayload::Usrp(samples)
        }
        CodecKind::C2_3200 | CodecKind::C2_1600 => {
            let b: [u8; 16] = payload
                .get(0..16)
                .ok_or_else(short_payload)?
                .try_into()
                .unwrap();
            IngressPayload::M17(b)
        }
    };

    Ok(Frame::new(
        header.module,
        header.stream_id,
        header.sequence,
        header.is_last,
        codec_in,
        ingress,
    ))
}

fn short_payload() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "short codec payload")
}

/// Encodes a completed frame: header followed by the D-Star, DMR, P25, M17,
/// and USRP fields back to back, matching the field order `decode_ingress`
/// reads on the way in.
fn encode_egress(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_DATAGRAM);
    Header {
        module: frame.module,
        stream_id: frame.stream_id,
        sequence: frame.sequence,
        is_last: frame.is_last,
    }
    .write(&mut buf);
    buf.extend_from_slice(frame.get_dstar().unwrap_or(&[0; 9]));
    buf.extend_from_slice(frame.get_dmr().unwrap_or(&[0; 9]));
    buf.extend_from_slice(frame.get_p25().unwrap_or(&[0; 11]));
    buf.extend_from_slice(frame.get_m17().unwrap_or(&[0; 16]));
    let usrp = frame.get_usrp().copied().unwrap_or([0; 160]);
    for sample in usrp {
        let mut tmp = [0u8; 2];
        BigEndian::write_i16(&mut tmp, sample);
        buf.extend_from_slice(&tmp);
    }
    buf
}

/// Owns the bound ingress socket and lazily-opened per-module egress
/// sockets (`REF2TC` / `TC2REF<module>`).
pub struct ReflectorSocket {
    ingress: UnixDatagram,
    socket_dir: String,
    egress: Mutex<HashMap<char, UnixDatagram>>,
}

impl ReflectorSocket {
    pub fn bind(socket_dir: &str) -> io::Result<ReflectorSocket> {
        let path = format!("{socket_dir}/REF2TC");
        let _ = std::fs::remove_file(&path);
        let ingress = UnixDatagram::bind(&path)?;
        Ok(ReflectorSocket {
            ingress,
            socket_dir: socket_dir.to_string(),
            egress: Mutex::new(HashMap::new()),
        })
    }

    /// Reads one datagram with the given timeout. `Ok(None)` on a timed-out
    /// read, so the caller can re-check `keep_running`.
    pub fn recv(&self, timeout: Duration) -> io::Result<Option<Frame>> {
        self.ingress.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.ingress.recv(&mut buf) {
            Ok(n) => decode_ingress(&buf[..n]).map(Some),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends a completed frame to its module's `TC2REF<module>` socket,
    /// opening (and caching) the client connection on first use.
    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        let bytes = encode_egress(frame);
        let mut egress = self.egress.lock().expect("egress map mutex poisoned");
        if !egress.contains_key(&frame.module) {
            let sock = UnixDatagram::unbound()?;
            let path = format!("{}/TC2REF{}", self.socket_dir, frame.module);
            sock.connect(&path)?;
            egress.insert(frame.module, sock);
        }
        egress[&frame.module].send(&bytes)?;
        Ok(())
    }

    /// Best-effort teardown: unlinks the ingress socket file so a restart
    /// doesn't hit `AddrInUse`.
    pub fn close(&self) {
        if let Ok(addr) = self.ingress.local_addr() {
            if let Some(path) = addr.as_pathname() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("failed to unlink ingress socket: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CodecKind, IngressPayload};

    #[test]
    fn dstar_ingress_round_trips_header_fields() {
        let mut buf = Vec::new();
        Header {
            module: 'B',
            stream_id: 0xabcd,
            sequence: 42,
            is_last: true,
        }
        .write(&mut buf);
        buf.push(codec_tag(CodecKind::DStar));
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let frame = decode_ingress(&buf).unwrap();
        assert_eq!(frame.module, 'B');
        assert_eq!(frame.stream_id, 0xabcd);
        assert_eq!(frame.sequence, 42);
        assert!(frame.is_last);
        assert_eq!(frame.get_dstar().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn usrp_ingress_decodes_big_endian_samples() {
        let mut buf = Vec::new();
        Header {
            module: 'A',
            stream_id: 1,
            sequence: 0,
            is_last: false,
        }
        .write(&mut buf);
        buf.push(codec_tag(CodecKind::Usrp));
        let mut samples = [0u8; 320];
        BigEndian::write_i16(&mut samples[0..2], -100);
        buf.extend_from_slice(&samples);

        let frame = decode_ingress(&buf).unwrap();
        assert_eq!(frame.get_usrp().unwrap()[0], -100);
    }

    #[test]
    fn encode_egress_includes_all_five_fields() {
        let frame = Frame::new(
            'A',
            1,
            0,
            false,
            CodecKind::DStar,
            IngressPayload::DStar([9; 9]),
        );
        frame.set_dmr([1; 9]);
        frame.set_p25([2; 11]);
        frame.set_m17([3; 16]);
        frame.set_usrp([-100; 160]);
        let bytes = encode_egress(&frame);
        assert_eq!(bytes.len(), Header::LEN + 9 + 9 + 11 + 16 + 320);
        assert_eq!(&bytes[Header::LEN..Header::LEN + 9], &[9; 9]);
        let usrp_start = Header::LEN + 9 + 9 + 11 + 16;
        assert_eq!(BigEndian::read_i16(&bytes[usrp_start..usrp_start + 2]), -100);
    }

    #[test]
    fn encode_egress_defaults_missing_usrp_to_silence() {
        let frame = Frame::new(
            'A',
            1,
            0,
            false,
            CodecKind::DStar,
            IngressPayload::DStar([9; 9]),
        );
        frame.set_dmr([1; 9]);
        frame.set_p25([2; 11]);
        frame.set_m17([3; 16]);
        let bytes = encode_egress(&frame);
        let usrp_start = Header::LEN + 9 + 9 + 11 + 16;
        assert!(bytes[usrp_start..].iter().all(|&b| b == 0));
    }
}
