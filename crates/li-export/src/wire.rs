//! Documents and exercises the exact external wire contract for the
//! inbound message queue and the outbound mediator socket framing.
//!
//! In-process, messages travel as the strongly-typed [`ExportMessage`]
//! enum over a `crossbeam_channel`, so this framing can never actually
//! be malformed. Crates that sit on the real IPC boundary (a PULL socket
//! reader, in the source's terms) use [`decode_wire_message`] to turn
//! bytes into the same typed value.

use std::io;

use crate::intercept::Liid;
use crate::job::{AccessTech, ControlMessage, Direction, ExportMessage, Job};

const TAG_MEDIATOR: u8 = 1;
const TAG_DROP_SINGLE_MEDIATOR: u8 = 2;
const TAG_INTERCEPT_DETAILS: u8 = 3;
const TAG_INTERCEPT_OVER: u8 = 4;
const TAG_IPIRI: u8 = 5;
const TAG_IPCC: u8 = 6;

fn bad_frame(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed wire message: {what}"))
}

struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        FrameReader { buf, pos: 0 }
    }

    fn u8(&mut self) -> io::Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| bad_frame("truncated u8"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| bad_frame("truncated u32"))?;
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn i32(&mut self) -> io::Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> io::Result<i64> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| bad_frame("truncated i64"))?;
        self.pos += 8;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// A length-prefixed frame: u32-be length, then that many bytes.
    fn frame(&mut self) -> io::Result<&'a [u8]> {
        let len = self.u32()? as usize;
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| bad_frame("frame length exceeds remaining buffer"))?;
        self.pos += len;
        Ok(bytes)
    }

    fn utf8_frame(&mut self) -> io::Result<String> {
        let bytes = self.frame()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| bad_frame("frame is not valid UTF-8"))
    }
}

/// Parses one framed message by leading tag byte. On any
/// framing error (wrong frame sizes, unknown tag, truncated buffer),
/// returns `Err` — callers are expected to log once and discard the
/// remaining bytes of that message, never propagate.
pub fn decode_wire_message(buf: &[u8]) -> io::Result<ExportMessage> {
    let mut r = FrameReader::new(buf);
    let tag = r.u8()?;

    let msg = match tag {
        TAG_MEDIATOR => {
            let mediatorid = r.u32()?;
            let ip = r.utf8_frame()?;
            let port = r.utf8_frame()?;
            ExportMessage::Control(ControlMessage::Mediator { mediatorid, ip, port })
        }
        TAG_DROP_SINGLE_MEDIATOR => {
            let mediatorid = r.u32()?;
            ExportMessage::Control(ControlMessage::DropSingleMediator { mediatorid })
        }
        TAG_INTERCEPT_DETAILS => {
            let liid = Liid::from(r.utf8_frame()?);
            let authcc = r.utf8_frame()?;
            let delivcc = r.utf8_frame()?;
            ExportMessage::Control(ControlMessage::InterceptDetails { liid, authcc, delivcc })
        }
        TAG_INTERCEPT_OVER => {
            let liid = Liid::from(r.utf8_frame()?);
            ExportMessage::Control(ControlMessage::InterceptOver { liid })
        }
        TAG_IPIRI => {
            let destid = r.u32()?;
            let special = r.u8()?;
            let cin = r.u32()?;
            let access_tech = match r.u8()? {
                0 => AccessTech::Adsl,
                1 => AccessTech::Cable,
                2 => AccessTech::Wireless,
                3 => AccessTech::Fiber,
                _ => AccessTech::Other,
            };
            let ip_assign = match r.u8()? {
                0 => crate::job::IpAssign::Static,
                1 => crate::job::IpAssign::Dynamic,
                _ => crate::job::IpAssign::Unknown,
            };
            let family = r.i32()?;
            let prefixbits = r.u8()?;
            let addr = r.frame()?.to_vec();
            let sec = r.i64()?;
            let usec = r.i64()?;
            let liid = Liid::from(r.utf8_frame()?);
            let username = r.utf8_frame()?;
            let timestamp = timestamp_from_sec_usec(sec, usec);
            ExportMessage::Job(Job::Ipiri {
                destid,
                liid,
                cin,
                special,
                access_tech,
                ip_assign,
                family,
                prefixbits,
                addr,
                timestamp,
                username,
            })
        }
        TAG_IPCC => {
            let destid = r.u32()?;
            let cin = r.u32()?;
            let direction = match r.u8()? {
                0 => Direction::ToSubject,
                1 => Direction::FromSubject,
                _ => Direction::Unknown,
            };
            let sec = r.i64()?;
            let usec = r.i64()?;
            let liid = Liid::from(r.utf8_frame()?);
            let ip_content = r.frame()?.to_vec();
            let timestamp = timestamp_from_sec_usec(sec, usec);
            ExportMessage::Job(Job::Ipcc {
                destid,
                liid,
                cin,
                direction,
                timestamp,
                ip_content,
            })
        }
        other => return Err(bad_frame(&format!("unrecognised tag {other}"))),
    };

    Ok(msg)
}

fn timestamp_from_sec_usec(sec: i64, usec: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(sec, (usec.max(0) as u32) * 1000)
        .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
}

/// A fully-encoded outgoing record, ready for the Export Buffer. Built by
/// the Encoder Adaptor out of an ETSI header, the LIID, the encoded
/// body, and (for CC records) the original payload.
pub struct EncodedRecord {
    pub header: Vec<u8>,
    pub liid: Liid,
    pub body: Vec<u8>,
    pub raw_ip_payload: Option<Vec<u8>>,
}

impl EncodedRecord {
    /// `header || u16-be liid_len || liid_bytes || body || optional
    /// ip_payload`.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let liid_bytes = self.liid.0.as_bytes();
        let mut out = Vec::with_capacity(
            self.header.len()
                + 2
                + liid_bytes.len()
                + self.body.len()
                + self.raw_ip_payload.as_ref().map(Vec::len).unwrap_or(0),
        );
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&(liid_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(liid_bytes);
        out.extend_from_slice(&self.body);
        if let Some(payload) = &self.raw_ip_payload {
            out.extend_from_slice(payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_frame(buf: &mut Vec<u8>, bytes: &[u8]) {
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
    }

    #[test]
    fn decodes_mediator_message() {
        let mut buf = vec![TAG_MEDIATOR];
        buf.extend_from_slice(&7u32.to_be_bytes());
        with_frame(&mut buf, b"127.0.0.1");
        with_frame(&mut buf, b"9000");

        let msg = decode_wire_message(&buf).unwrap();
        match msg {
            ExportMessage::Control(ControlMessage::Mediator { mediatorid, ip, port }) => {
                assert_eq!(mediatorid, 7);
                assert_eq!(ip, "127.0.0.1");
                assert_eq!(port, "9000");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_intercept_details() {
        let mut buf = vec![TAG_INTERCEPT_DETAILS];
        with_frame(&mut buf, b"LIID1");
        with_frame(&mut buf, b"NZ");
        with_frame(&mut buf, b"NZ");

        let msg = decode_wire_message(&buf).unwrap();
        match msg {
            ExportMessage::Control(ControlMessage::InterceptDetails { liid, authcc, delivcc }) => {
                assert_eq!(liid.0, "LIID1");
                assert_eq!(authcc, "NZ");
                assert_eq!(delivcc, "NZ");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn truncated_message_is_an_error_not_a_panic() {
        let buf = vec![TAG_MEDIATOR, 0, 0, 0];
        assert!(decode_wire_message(&buf).is_err());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let buf = vec![255u8];
        assert!(decode_wire_message(&buf).is_err());
    }

    #[test]
    fn encoded_record_wire_layout() {
        let rec = EncodedRecord {
            header: vec![0xAA, 0xBB],
            liid: Liid::from("X"),
            body: vec![1, 2, 3],
            raw_ip_payload: Some(vec![9, 9]),
        };
        let bytes = rec.to_wire_bytes();
        assert_eq!(bytes[0..2], [0xAA, 0xBB]);
        assert_eq!(bytes[2..4], [0, 1]); // u16-be liid_len == 1
        assert_eq!(bytes[4], b'X');
        assert_eq!(bytes[5..8], [1, 2, 3]);
        assert_eq!(bytes[8..10], [9, 9]);
    }
}
