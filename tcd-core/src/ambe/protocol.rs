//! DVSI USB wire protocol constants and packet (de)serialization, bit-exact
//! with the hardware's control/channel/speech packet layout.

use std::io;

use byteorder::{BigEndian, ByteOrder};

pub const START_BYTE: u8 = 0x61;

pub const PKT_CONTROL: u8 = 0x00;
pub const PKT_CHANNEL: u8 = 0x01;
pub const PKT_SPEECH: u8 = 0x02;

pub const PKT_SPEECHD: u8 = 0x00;
pub const PKT_CHAND: u8 = 0x01;
pub const PKT_INIT: u8 = 0x0b;
pub const PKT_PRODID: u8 = 0x30;
pub const PKT_VERSTRING: u8 = 0x31;
pub const PKT_PARITYBYTE: u8 = 0x2f;
pub const PKT_RESET: u8 = 0x33;
pub const PKT_READY: u8 = 0x39;
pub const PKT_CHANNEL0: u8 = 0x40;
pub const PKT_PARITYMODE: u8 = 0x3f;
pub const PKT_ECMODE: u8 = 0x05;
pub const PKT_DCMODE: u8 = 0x06;
pub const PKT_RATEP: u8 = 0x0a;
pub const PKT_CHANFMT: u8 = 0x15;
pub const PKT_SPCHFMT: u8 = 0x16;
pub const PKT_GAIN: u8 = 0x4b;

/// Rate-parameter vector selecting the D-Star vocoder personality.
pub const RATEP_DSTAR: [u8; 13] = [
    PKT_RATEP, 0x01, 0x30, 0x07, 0x63, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x48,
];

/// Rate-parameter vector selecting the DMR/YSF vocoder personality.
pub const RATEP_DMR: [u8; 13] = [
    PKT_RATEP, 0x04, 0x31, 0x07, 0x54, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6f, 0x48,
];

/// The tags that appear, each preceded by a zero byte, in the fixed 15-byte
/// acknowledgement a successful `ConfigureVocoder` must match.
pub const CONFIG_ACK_TAGS: [u8; 7] = [
    PKT_ECMODE, PKT_DCMODE, PKT_RATEP, PKT_CHANFMT, PKT_SPCHFMT, PKT_GAIN, PKT_INIT,
];

/// Builds the 15-byte acknowledgement template: `{0, tag, 0, tag, ...}`
/// (`resp[]` in `ConfigureVocoder`).
pub fn config_ack_template() -> [u8; 15] {
    let mut buf = [0u8; 15];
    for (i, tag) in CONFIG_ACK_TAGS.iter().enumerate() {
        buf[2 * i + 1] = *tag;
    }
    buf
}

/// One decoded host<->device packet.
#[derive(Debug, Clone)]
pub struct DvsiPacket {
    pub packet_type: u8,
    pub field_id: u8,
    pub payload: Vec<u8>,
}

impl DvsiPacket {
    /// Serializes a control packet: start byte, header, field id, payload.
    pub fn encode_control(field_id: u8, payload: &[u8]) -> Vec<u8> {
        Self::encode(PKT_CONTROL, field_id, payload)
    }

    pub fn encode(packet_type: u8, field_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.push(START_BYTE);
        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, (1 + payload.len()) as u16);
        buf.extend_from_slice(&len_bytes);
        buf.push(packet_type);
        buf.push(field_id);
        buf.extend_from_slice(payload);
        buf
    }

    /// Builds the 13-byte (+2 header fields) codec config packet sent per
    /// channel during `InitVocoders`.
    pub fn encode_vocoder_config(field_id: u8, ratep: &[u8; 13], in_gain: i8, out_gain: i8) -> Vec<u8> {
        let mut payload = Vec::with_capacity(3 + 3 + 13 + 3 + 3 + 3 + 2);
        payload.extend_from_slice(&[PKT_ECMODE, 0x0, 0x0]);
        payload.extend_from_slice(&[PKT_DCMODE, 0x0, 0x0]);
        payload.extend_from_slice(ratep);
        payload.extend_from_slice(&[PKT_CHANFMT, 0x0, 0x0]);
        payload.extend_from_slice(&[PKT_SPCHFMT, 0x0, 0x0]);
        payload.extend_from_slice(&[PKT_GAIN, in_gain as u8, out_gain as u8]);
        payload.extend_from_slice(&[PKT_INIT, 0x3]);
        Self::encode_control(field_id, &payload)
    }

    /// Builds a Speech (encode) request: PCM samples, network byte order.
    pub fn encode_speech(field_id: u8, samples: &[i16; 160]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + 320);
        payload.push(PKT_SPEECHD);
        payload.push(160);
        for s in samples {
            let mut tmp = [0u8; 2];
            BigEndian::write_i16(&mut tmp, *s);
            payload.extend_from_slice(&tmp);
        }
        Self::encode(PKT_SPEECH, field_id, &payload)
    }

    /// Builds a Channel (decode) request: 9-byte, 72-bit AMBE payload.
    pub fn encode_channel(field_id: u8, data: &[u8; 9]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + 9);
        payload.push(PKT_CHAND);
        payload.push(72);
        payload.extend_from_slice(data);
        Self::encode(PKT_CHANNEL, field_id, &payload)
    }

    /// Decodes the PCM samples out of a Speech response payload
    /// (`speechd`, `num_samples`, `samples[160]`).
    pub fn decode_speech_payload(&self) -> io::Result<[i16; 160]> {
        if self.payload.len() < 2 + 320 {
            return Err(malformed("speech response too short"));
        }
        let mut out = [0i16; 160];
        for (i, slot) in out.iter_mut().enumerate() {
            let off = 2 + i * 2;
            *slot = BigEndian::read_i16(&self.payload[off..off + 2]);
        }
        Ok(out)
    }

    /// Decodes the 9-byte AMBE payload out of a Channel response.
    pub fn decode_channel_payload(&self) -> io::Result<[u8; 9]> {
        if self.payload.len() < 2 + 9 {
            return Err(malformed("channel response too short"));
        }
        let mut out = [0u8; 9];
        out.copy_from_slice(&self.payload[2..11]);
        Ok(out)
    }
}

fn malformed(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// 16-bytes-per-line hex+ASCII dump for malformed device responses, in the
/// style of a classic protocol-analyzer dump.
pub struct HexDump<'a>(pub &'a [u8]);

impl std::fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in self.0.chunks(16) {
            for (i, b) in line.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{b:02x}")?;
            }
            for _ in line.len()..16 {
                write!(f, "   ")?;
            }
            write!(f, "   *")?;
            for &b in line {
                let c = b as char;
                if c.is_ascii_graphic() || c == ' ' {
                    write!(f, "{c}")?;
                } else {
                    write!(f, ".")?;
                }
            }
            write!(f, "*")?;
            if line.len() == 16 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_request_round_trips_through_decode() {
        let mut samples = [0i16; 160];
        samples[0] = -5;
        samples[159] = 32000;
        let encoded = DvsiPacket::encode_speech(PKT_CHANNEL0, &samples);
        assert_eq!(encoded[0], START_BYTE);
        assert_eq!(encoded[3], PKT_SPEECH);
        assert_eq!(encoded[4], PKT_CHANNEL0);

        let response = DvsiPacket {
            packet_type: PKT_SPEECH,
            field_id: PKT_CHANNEL0,
            payload: encoded[5..].to_vec(),
        };
        let decoded = response.decode_speech_payload().unwrap();
        assert_eq!(decoded[0], -5);
        assert_eq!(decoded[159], 32000);
    }

    #[test]
    fn channel_request_round_trips_through_decode() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let encoded = DvsiPacket::encode_channel(PKT_CHANNEL0, &data);
        let response = DvsiPacket {
            packet_type: PKT_CHANNEL,
            field_id: PKT_CHANNEL0,
            payload: encoded[5..].to_vec(),
        };
        assert_eq!(response.decode_channel_payload().unwrap(), data);
    }

    #[test]
    fn hex_dump_pads_short_lines_and_escapes_nonprintables() {
        let rendered = format!("{}", HexDump(&[0x61, 0x00, 0xff]));
        assert_eq!(rendered, "61 00 ff                                          *a..*");
    }

    #[test]
    fn vocoder_config_packet_carries_the_chosen_ratep_vector() {
        let encoded = DvsiPacket::encode_vocoder_config(PKT_CHANNEL0, &RATEP_DSTAR, 0, 0);
        // header(4) + field_id(1) + ecmode(3) + dcmode(3) = offset 11 for ratep
        assert_eq!(&encoded[11..24], &RATEP_DSTAR);
    }
}
