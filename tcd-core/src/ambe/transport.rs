//! The byte-stream boundary between the device driver and the physical (or
//! simulated) DVSI hardware, abstracted behind a trait so the driver can run
//! against a loopback double in tests without real hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex};

use byteorder::{BigEndian, ByteOrder};

use super::protocol::{
    config_ack_template, DvsiPacket, PKT_CHANNEL, PKT_CONTROL, PKT_PARITYMODE, PKT_PRODID,
    PKT_READY, PKT_RESET, PKT_SPEECH, PKT_VERSTRING, START_BYTE,
};

/// The host-side half of the DVSI USB link.
pub trait DvsiTransport: Send + Sync {
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;
    /// Blocking read of exactly `buf.len()` bytes.
    fn read_exact(&self, buf: &mut [u8]) -> io::Result<()>;
}

#[cfg(feature = "hardware")]
pub mod ftdi {
    use super::DvsiTransport;
    use libftd2xx::{list_devices, Ftdi, FtdiCommon};
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    /// One attached FTDI device as reported by the driver, before it's
    /// opened.
    pub struct DiscoveredDevice {
        pub serial_number: String,
        pub description: String,
    }

    /// Enumerates attached FTDI devices. The caller picks a `DeviceClass`
    /// from each `description` (`DeviceClass::from_description`) before
    /// opening it.
    pub fn discover() -> io::Result<Vec<DiscoveredDevice>> {
        let infos = list_devices().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(infos
            .into_iter()
            .map(|info| DiscoveredDevice {
                serial_number: info.serial_number,
                description: info.description,
            })
            .collect())
    }

    /// Real hardware binding over an FTDI USB interface (feature `hardware`).
    /// Opens 8N1 with RTS/CTS flow control and a 4 ms latency timer.
    pub struct Ft2xxTransport {
        device: Mutex<Ftdi>,
    }

    impl Ft2xxTransport {
        /// Opens by serial number: purge, 8N1, RTS/CTS flow control, the
        /// `DF2ET` DTR-polarity special case, baud rate by device class, a
        /// 4 ms latency timer, and a USB transfer size rounded up to the
        /// next multiple of 64 bytes.
        pub fn open(serial_number: &str, description: &str, baud_rate: u32) -> io::Result<Ft2xxTransport> {
            let to_io = |e: libftd2xx::FtStatus| io::Error::new(io::ErrorKind::Other, format!("{e:?}"));

            let mut device = Ftdi::with_serial_number(serial_number).map_err(to_io)?;
            device.purge_all().map_err(to_io)?;
            device
                .set_data_characteristics(
                    libftd2xx::BitsPerWord::Bits8,
                    libftd2xx::StopBits::Bits1,
                    libftd2xx::Parity::No,
                )
                .map_err(to_io)?;
            device.set_flow_control_rts_cts().map_err(to_io)?;
            device.set_rts().map_err(to_io)?;

            if description.contains("DF2ET") {
                device.set_dtr().map_err(to_io)?;
            } else {
                device.clear_dtr().map_err(to_io)?;
            }

            device.set_baud_rate(baud_rate).map_err(to_io)?;
            device.set_latency_timer(Duration::from_millis(4)).map_err(to_io)?;

            // Largest packet on the wire is a Speech request: 1 start byte + 2
            // length bytes + 1 packet type + 1 field id + 1 speechd byte + 1
            // num-samples byte + 160 i16 samples (320 bytes) = 327 bytes.
            const MAX_PACKET_SIZE: u32 = 1 + 2 + 1 + 1 + 1 + 1 + 320;
            let usb_transfer_size = MAX_PACKET_SIZE.div_ceil(64) * 64;
            device.set_usb_parameters(usb_transfer_size).map_err(to_io)?;

            Ok(Ft2xxTransport {
                device: Mutex::new(device),
            })
        }
    }

    impl DvsiTransport for Ft2xxTransport {
        fn write_all(&self, buf: &[u8]) -> io::Result<()> {
            use std::io::Write;
            self.device
                .lock()
                .expect("ftdi device mutex poisoned")
                .write_all(buf)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        }

        fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
            use std::io::Read;
            self.device
                .lock()
                .expect("ftdi device mutex poisoned")
                .read_exact(buf)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        }
    }
}

/// An in-process stand-in DVSI device: answers the init handshake correctly
/// and echoes Speech/Channel requests back unmodified (an identity vocoder),
/// which is enough for the driver's plumbing to be exercised without real
/// hardware or a real AMBE codec.
pub struct LoopbackTransport {
    pending: Mutex<VecDeque<u8>>,
    available: Condvar,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            pending: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn enqueue_response(&self, bytes: Vec<u8>) {
        let mut pending = self.pending.lock().expect("loopback mutex poisoned");
        pending.extend(bytes);
        self.available.notify_all();
    }

    fn handle_request(&self, packet_type: u8, field_id: u8, payload: &[u8]) {
        let response = match packet_type {
            PKT_CONTROL => match field_id {
                f if f == super::protocol::PKT_RESET => {
                    DvsiPacket::encode_control(PKT_READY, &[])
                }
                f if f == super::protocol::PKT_PARITYMODE => {
                    DvsiPacket::encode_control(PKT_PARITYMODE, &[0, 0])
                }
                f if f == super::protocol::PKT_PRODID => {
                    let mut prodid = [0u8; 16];
                    prodid[..9].copy_from_slice(b"loopback\0");
                    DvsiPacket::encode_control(PKT_PRODID, &prodid)
                }
                f if f == super::protocol::PKT_VERSTRING => {
                    let mut version = [0u8; 48];
                    version[..4].copy_from_slice(b"0.0\0");
                    DvsiPacket::encode_control(PKT_VERSTRING, &version)
                }
                _ => {
                    // a vocoder-config request: acknowledge with the tag
                    // template, echoing the channel id as field_id.
                    DvsiPacket::encode_control(field_id, &config_ack_template())
                }
            },
            PKT_SPEECH => {
                // stand-in "encoder": a Speech (PCM) request gets back a
                // Channel (AMBE-shaped) response, as real DVSI hardware does.
                let mut samples = [0i16; 160];
                for (i, slot) in samples.iter_mut().enumerate() {
                    let off = 2 + i * 2;
                    if off + 2 <= payload.len() {
                        *slot = BigEndian::read_i16(&payload[off..off + 2]);
                    }
                }
                let mut data = [0u8; 9];
                for (i, d) in data.iter_mut().enumerate() {
                    *d = samples[i] as u8;
                }
                DvsiPacket::encode_channel(field_id, &data)
            }
            PKT_CHANNEL => {
                // stand-in "decoder": a Channel (AMBE) request gets back a
                // Speech (PCM-shaped) response.
                let mut data = [0u8; 9];
                if payload.len() >= 11 {
                    data.copy_from_slice(&payload[2..11]);
                }
                let mut samples = [0i16; 160];
                for (i, slot) in samples.iter_mut().enumerate() {
                    *slot = data[i % data.len()] as i16;
                }
                DvsiPacket::encode_speech(field_id, &samples)
            }
            _ => Vec::new(),
        };
        if !response.is_empty() {
            self.enqueue_response(response);
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DvsiTransport for LoopbackTransport {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() || buf[0] != START_BYTE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "missing start byte"));
        }
        let payload_length = BigEndian::read_u16(&buf[1..3]) as usize;
        let packet_type = buf[3];
        let field_id = buf[4];
        let payload = &buf[5..5 + (payload_length.saturating_sub(1))];
        self.handle_request(packet_type, field_id, payload);
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut pending = self.pending.lock().expect("loopback mutex poisoned");
        for slot in buf.iter_mut() {
            while pending.is_empty() {
                pending = self.available.wait(pending).expect("loopback condvar poisoned");
            }
            *slot = pending.pop_front().unwrap();
        }
        Ok(())
    }
}
