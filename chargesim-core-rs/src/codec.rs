//! Binary wire codec for command and state packets
//!
//! All fields are little-endian at fixed offsets. Layouts per generation:
//!
//! ```text
//! legacy header   seq:u8 version:u8 padding:u16                        (4 B)
//! legacy command  header allocated_current:u16                         (6 B)
//! legacy state    header iec61851:u8 charger:u8 error:u8 uptime:u32
//!                 charging_time:u32 allowed:u16 supported:u16 managed:u8 (20 B)
//!
//! current header  magic:u16 length:u16 seq:u16 version:u8 padding:u8    (8 B)
//! current command header allocated_current:u16 flags:u8 padding:u8     (12 B)
//! current state   header feature_flags:u32 uptime:u32 charging_time:u32
//!                 allowed:u16 supported:u16 iec61851:u8 charger:u8
//!                 error:u8 state_flags:u8 voltages:3xf32 currents:3xf32
//!                 power_factors:3xf32 energy_rel:f32 energy_abs:f32    (72 B)
//! ```

use crate::error::MalformedPacket;
use crate::types::{
    CommandFlags, CommandPacket, PacketHeader, ProtocolGeneration, StateFlags, StatePacket,
    PACKET_MAGIC,
};

/// Encoder/decoder for one protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCodec {
    generation: ProtocolGeneration,
}

impl WireCodec {
    pub fn new(generation: ProtocolGeneration) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    /// Encode a state packet. Output is always `state_len()` bytes.
    pub fn encode_state(&self, packet: &StatePacket) -> Vec<u8> {
        let len = self.generation.state_len();
        let mut w = Writer::with_capacity(len);
        self.write_header(&mut w, &packet.header, len);

        match self.generation {
            ProtocolGeneration::Legacy => {
                w.u8(packet.iec61851_state);
                w.u8(packet.charger_state);
                w.u8(packet.error_state);
                w.u32(packet.evse_uptime_ms);
                w.u32(packet.charging_time_ms);
                w.u16(packet.allowed_charging_current_ma);
                w.u16(packet.supported_current_ma);
                w.u8(u8::from(packet.flags.managed));
            }
            ProtocolGeneration::Current => {
                w.u32(packet.feature_flags);
                w.u32(packet.evse_uptime_ms);
                w.u32(packet.charging_time_ms);
                w.u16(packet.allowed_charging_current_ma);
                w.u16(packet.supported_current_ma);
                w.u8(packet.iec61851_state);
                w.u8(packet.charger_state);
                w.u8(packet.error_state);
                w.u8(packet.flags.bits());
                for v in packet
                    .line_voltages
                    .iter()
                    .chain(&packet.line_currents)
                    .chain(&packet.line_power_factors)
                {
                    w.f32(*v);
                }
                w.f32(packet.energy_rel);
                w.f32(packet.energy_abs);
            }
        }

        w.finish(len)
    }

    /// Decode a state packet (manager side of the protocol).
    pub fn decode_state(&self, buf: &[u8]) -> Result<StatePacket, MalformedPacket> {
        self.check_frame(buf, self.generation.state_len())?;
        let mut r = Reader::new(buf);
        let header = self.read_header(&mut r);

        let packet = match self.generation {
            ProtocolGeneration::Legacy => {
                let iec61851_state = r.u8();
                let charger_state = r.u8();
                let error_state = r.u8();
                let evse_uptime_ms = r.u32();
                let charging_time_ms = r.u32();
                let allowed_charging_current_ma = r.u16();
                let supported_current_ma = r.u16();
                let managed = r.u8() != 0;
                StatePacket {
                    header,
                    evse_uptime_ms,
                    charging_time_ms,
                    allowed_charging_current_ma,
                    supported_current_ma,
                    iec61851_state,
                    charger_state,
                    error_state,
                    flags: StateFlags {
                        managed,
                        cp_disconnect: false,
                    },
                    ..StatePacket::default()
                }
            }
            ProtocolGeneration::Current => StatePacket {
                header,
                feature_flags: r.u32(),
                evse_uptime_ms: r.u32(),
                charging_time_ms: r.u32(),
                allowed_charging_current_ma: r.u16(),
                supported_current_ma: r.u16(),
                iec61851_state: r.u8(),
                charger_state: r.u8(),
                error_state: r.u8(),
                flags: StateFlags::from_bits(r.u8()),
                line_voltages: [r.f32(), r.f32(), r.f32()],
                line_currents: [r.f32(), r.f32(), r.f32()],
                line_power_factors: [r.f32(), r.f32(), r.f32()],
                energy_rel: r.f32(),
                energy_abs: r.f32(),
            },
        };

        Ok(packet)
    }

    /// Encode a command packet (manager side of the protocol).
    pub fn encode_command(&self, packet: &CommandPacket) -> Vec<u8> {
        let len = self.generation.command_len();
        let mut w = Writer::with_capacity(len);
        self.write_header(&mut w, &packet.header, len);
        w.u16(packet.allocated_current_ma);

        if self.generation == ProtocolGeneration::Current {
            w.u8(packet.flags.bits());
            w.u8(0);
        }

        w.finish(len)
    }

    /// Decode a command packet.
    ///
    /// Fails if the datagram is not exactly `command_len()` bytes, or for the
    /// current generation if the magic does not match.
    pub fn decode_command(&self, buf: &[u8]) -> Result<CommandPacket, MalformedPacket> {
        self.check_frame(buf, self.generation.command_len())?;
        let mut r = Reader::new(buf);
        let header = self.read_header(&mut r);
        let allocated_current_ma = r.u16();

        let flags = match self.generation {
            ProtocolGeneration::Legacy => CommandFlags::default(),
            ProtocolGeneration::Current => CommandFlags::from_bits(r.u8()),
        };

        Ok(CommandPacket {
            header,
            allocated_current_ma,
            flags,
        })
    }

    fn check_frame(&self, buf: &[u8], expected: usize) -> Result<(), MalformedPacket> {
        if buf.len() != expected {
            return Err(MalformedPacket::WrongLength {
                generation: self.generation,
                expected,
                actual: buf.len(),
            });
        }

        if self.generation == ProtocolGeneration::Current {
            let magic = u16::from_le_bytes([buf[0], buf[1]]);
            if magic != PACKET_MAGIC {
                return Err(MalformedPacket::BadMagic { found: magic });
            }
        }

        Ok(())
    }

    fn write_header(&self, w: &mut Writer, header: &PacketHeader, total_len: usize) {
        match self.generation {
            ProtocolGeneration::Legacy => {
                // 8-bit sequence on the wire; callers keep it below 256
                w.u8(header.sequence as u8);
                w.u8(header.version);
                w.u16(0);
            }
            ProtocolGeneration::Current => {
                w.u16(PACKET_MAGIC);
                w.u16(total_len as u16);
                w.u16(header.sequence);
                w.u8(header.version);
                w.u8(0);
            }
        }
    }

    /// Reads the header. Magic was already verified by `check_frame`.
    fn read_header(&self, r: &mut Reader<'_>) -> PacketHeader {
        match self.generation {
            ProtocolGeneration::Legacy => {
                let sequence = u16::from(r.u8());
                let version = r.u8();
                r.skip(2);
                PacketHeader { sequence, version }
            }
            ProtocolGeneration::Current => {
                r.skip(4);
                let sequence = r.u16();
                let version = r.u8();
                r.skip(1);
                PacketHeader { sequence, version }
            }
        }
    }
}

/// Little-endian appender over a preallocated buffer
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(len),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn finish(self, expected: usize) -> Vec<u8> {
        assert_eq!(self.buf.len(), expected, "encoded packet has wrong length");
        self.buf
    }
}

/// Little-endian cursor. Callers check the frame length up front,
/// so reads never run past the end.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn u8(&mut self) -> u8 {
        let [b] = self.take::<1>();
        b
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}
