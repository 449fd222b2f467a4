//! HMTL module message format.
//!
//! Every message starts with an 8 byte header followed by an output header
//! and the output's payload. Multi-byte fields are little-endian.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

pub const START_CODE: u8 = 0xFC;
pub const PROTOCOL_VERSION: u8 = 2;

/// Destination address every module listens to.
pub const BROADCAST: u16 = 65535;

const MSG_BASE_LEN: usize = 8;
const MSG_OUTPUT_LEN: usize = MSG_BASE_LEN + 2;
const MSG_VALUE_LEN: usize = MSG_OUTPUT_LEN + 2;
const MSG_RGB_LEN: usize = MSG_OUTPUT_LEN + 3;
pub const PROGRAM_DATA_LEN: usize = 12;
const MSG_PROGRAM_LEN: usize = MSG_OUTPUT_LEN + 1 + PROGRAM_DATA_LEN;
const MSG_POLL_LEN: usize = MSG_BASE_LEN;

pub const MSG_TYPE_OUTPUT: u8 = 1;
pub const MSG_TYPE_POLL: u8 = 2;

pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_RESPONSE: u8 = 0x2;

pub const OUTPUT_VALUE: u8 = 0x1;
pub const OUTPUT_RGB: u8 = 0x2;
pub const OUTPUT_PROGRAM: u8 = 0x3;

pub const PROGRAM_NONE: u8 = 0;
pub const PROGRAM_BLINK: u8 = 1;
pub const PROGRAM_TIMED_CHANGE: u8 = 2;

/// Common header of every HMTL message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub crc: u8,
    pub version: u8,
    /// Total message length, header included.
    pub length: u8,
    pub mtype: u8,
    pub flags: u8,
    /// Destination module address.
    pub address: u16,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad start code {0:#04x}")]
    BadStartCode(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("truncated message: {0}")]
    IoError(#[from] io::Error),
}

impl MsgHeader {
    fn new(length: usize, address: u16, mtype: u8, flags: u8) -> MsgHeader {
        MsgHeader {
            crc: 0,
            version: PROTOCOL_VERSION,
            length: length as u8,
            mtype,
            flags,
            address,
        }
    }

    /// Write the header into the first 8 bytes of `buf`.
    fn write_into(&self, buf: &mut [u8]) {
        buf[0] = START_CODE;
        buf[1] = self.crc;
        buf[2] = self.version;
        buf[3] = self.length;
        buf[4] = self.mtype;
        buf[5] = self.flags;
        LittleEndian::write_u16(&mut buf[6..8], self.address);
    }

    /// Read and check a header.
    pub fn read_from(buf: &mut dyn Read) -> ProtocolResult<MsgHeader> {
        let start = buf.read_u8()?;
        if start != START_CODE {
            return Err(ProtocolError::BadStartCode(start));
        }
        let crc = buf.read_u8()?;
        let version = buf.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        Ok(MsgHeader {
            crc,
            version,
            length: buf.read_u8()?,
            mtype: buf.read_u8()?,
            flags: buf.read_u8()?,
            address: buf.read_u16::<LittleEndian>()?,
        })
    }
}

/// Allocate a message with its header and output header filled in.
fn output_msg(length: usize, address: u16, output_type: u8, output: u8) -> Vec<u8> {
    let mut buf = vec![0; length];
    MsgHeader::new(length, address, MSG_TYPE_OUTPUT, 0).write_into(&mut buf);
    buf[MSG_BASE_LEN] = output_type;
    buf[MSG_BASE_LEN + 1] = output;
    buf
}

/// Set a single-value output (relay, solenoid, dimmer).
pub fn value_msg(address: u16, output: u8, value: u16) -> Vec<u8> {
    let mut buf = output_msg(MSG_VALUE_LEN, address, OUTPUT_VALUE, output);
    LittleEndian::write_u16(&mut buf[MSG_OUTPUT_LEN..], value);
    buf
}

/// Set an RGB output.
pub fn rgb_msg(address: u16, output: u8, red: u8, green: u8, blue: u8) -> Vec<u8> {
    let mut buf = output_msg(MSG_RGB_LEN, address, OUTPUT_RGB, output);
    buf[MSG_OUTPUT_LEN] = red;
    buf[MSG_OUTPUT_LEN + 1] = green;
    buf[MSG_OUTPUT_LEN + 2] = blue;
    buf
}

fn program_msg(address: u16, output: u8, program: u8, data: &[u8; PROGRAM_DATA_LEN]) -> Vec<u8> {
    let mut buf = output_msg(MSG_PROGRAM_LEN, address, OUTPUT_PROGRAM, output);
    buf[MSG_OUTPUT_LEN] = program;
    buf[MSG_OUTPUT_LEN + 1..].copy_from_slice(data);
    buf
}

/// Stop whatever program is running on an output.
pub fn program_none_msg(address: u16, output: u8) -> Vec<u8> {
    program_msg(address, output, PROGRAM_NONE, &[0; PROGRAM_DATA_LEN])
}

/// Hold `start` for `period_ms`, then switch to `stop`.
pub fn timed_change_msg(
    address: u16,
    output: u8,
    period_ms: u32,
    start: [u8; 3],
    stop: [u8; 3],
) -> Vec<u8> {
    let mut data = [0; PROGRAM_DATA_LEN];
    LittleEndian::write_u32(&mut data[0..4], period_ms);
    data[4..7].copy_from_slice(&start);
    data[7..10].copy_from_slice(&stop);
    program_msg(address, output, PROGRAM_TIMED_CHANGE, &data)
}

/// Ask a module to report itself.
pub fn poll_msg(address: u16) -> Vec<u8> {
    let mut buf = vec![0; MSG_POLL_LEN];
    MsgHeader::new(MSG_POLL_LEN, address, MSG_TYPE_POLL, FLAG_RESPONSE).write_into(&mut buf);
    buf
}

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Value { output: u8, value: u16 },
    Rgb { output: u8, red: u8, green: u8, blue: u8 },
    Program { output: u8, program: u8, data: [u8; PROGRAM_DATA_LEN] },
    Poll,
    /// Anything else, left as raw bytes.
    Other(Vec<u8>),
}

/// A whole decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub header: MsgHeader,
    pub body: Body,
}

/// Decode a single message, e.g. for logging outgoing frames.
pub fn decode(mut frame: &[u8]) -> ProtocolResult<Msg> {
    let buf: &mut dyn Read = &mut frame;
    let header = MsgHeader::read_from(buf)?;

    let body = match header.mtype {
        MSG_TYPE_POLL => Body::Poll,
        MSG_TYPE_OUTPUT => {
            let output_type = buf.read_u8()?;
            let output = buf.read_u8()?;
            match output_type {
                OUTPUT_VALUE => Body::Value {
                    output,
                    value: buf.read_u16::<LittleEndian>()?,
                },
                OUTPUT_RGB => Body::Rgb {
                    output,
                    red: buf.read_u8()?,
                    green: buf.read_u8()?,
                    blue: buf.read_u8()?,
                },
                OUTPUT_PROGRAM => {
                    let program = buf.read_u8()?;
                    let mut data = [0; PROGRAM_DATA_LEN];
                    buf.read_exact(&mut data)?;
                    Body::Program { output, program, data }
                }
                _ => {
                    let mut rest = vec![output_type, output];
                    buf.read_to_end(&mut rest)?;
                    Body::Other(rest)
                }
            }
        }
        _ => {
            let mut rest = vec![];
            buf.read_to_end(&mut rest)?;
            Body::Other(rest)
        }
    };

    Ok(Msg { header, body })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_msg_layout() {
        let msg = value_msg(12, 1, 0x01ff);
        assert_eq!(
            vec![0xfc, 0, 2, 12, MSG_TYPE_OUTPUT, 0, 12, 0, OUTPUT_VALUE, 1, 0xff, 0x01],
            msg
        );
    }

    #[test]
    fn test_rgb_msg_layout() {
        let msg = rgb_msg(BROADCAST, 0, 10, 20, 30);
        assert_eq!(
            vec![0xfc, 0, 2, 13, MSG_TYPE_OUTPUT, 0, 0xff, 0xff, OUTPUT_RGB, 0, 10, 20, 30],
            msg
        );
    }

    #[test]
    fn test_timed_change_msg() {
        let msg = timed_change_msg(25, 2, 1500, [255, 255, 255], [0, 0, 0]);
        assert_eq!(MSG_PROGRAM_LEN, msg.len());
        let decoded = decode(&msg).unwrap();
        assert_eq!(25, decoded.header.address);
        assert_eq!(MSG_PROGRAM_LEN as u8, decoded.header.length);
        match decoded.body {
            Body::Program { output, program, data } => {
                assert_eq!(2, output);
                assert_eq!(PROGRAM_TIMED_CHANGE, program);
                assert_eq!(1500, LittleEndian::read_u32(&data[0..4]));
                assert_eq!([255, 255, 255, 0, 0, 0, 0, 0], data[4..]);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_poll_and_none() {
        let poll = decode(&poll_msg(3)).unwrap();
        assert_eq!(Body::Poll, poll.body);
        assert_eq!(FLAG_RESPONSE, poll.header.flags);

        let none = decode(&program_none_msg(3, 4)).unwrap();
        assert_eq!(
            Body::Program { output: 4, program: PROGRAM_NONE, data: [0; PROGRAM_DATA_LEN] },
            none.body
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(&[0x00, 0, 2]), Err(ProtocolError::BadStartCode(0))));
        assert!(matches!(decode(&[0xfc, 0, 9]), Err(ProtocolError::UnsupportedVersion(9))));
        let truncated = &value_msg(1, 1, 1)[..10];
        assert!(matches!(decode(truncated), Err(ProtocolError::IoError(_))));
    }
}
