//! Frame codec for the TCP transport.
//!
//! Layout on the stream:
//!
//! ```text
//! [u32 len BE][u8 kind][body ...][u32 crc32 BE]
//! ```
//!
//! `len` counts kind + body + crc. The checksum covers kind + body, so a
//! truncated or bit-flipped frame is detected before any payload parsing.
//! Body layouts per kind:
//!
//! ```text
//! MSG   [u16 env_len BE][envelope utf8][payload bytes]
//! SUB   [prefix utf8]
//! UNSUB [prefix utf8]
//! REQ   [u16 id_len BE][client id utf8][request bytes]
//! REP   [reply bytes]
//! ```

use crate::{Error, Result};

/// Refuse frames past this size; a peer sending more is broken, not big.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const KIND_MSG: u8 = 1;
const KIND_SUB: u8 = 2;
const KIND_UNSUB: u8 = 3;
const KIND_REQ: u8 = 4;
const KIND_REP: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Topic-tagged datagram on the publish path.
    Message { envelope: String, payload: Vec<u8> },
    /// Subscription announce from a subscribing peer.
    Subscribe { prefix: String },
    Unsubscribe { prefix: String },
    /// Control request, tagged with the caller's stable identity.
    Request { client_id: String, body: Vec<u8> },
    /// Control reply. Carries no type tag; the requester interprets it.
    Reply { body: Vec<u8> },
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Message { .. } => KIND_MSG,
            Frame::Subscribe { .. } => KIND_SUB,
            Frame::Unsubscribe { .. } => KIND_UNSUB,
            Frame::Request { .. } => KIND_REQ,
            Frame::Reply { .. } => KIND_REP,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            Frame::Message { envelope, payload } => {
                let mut body = Vec::with_capacity(2 + envelope.len() + payload.len());
                body.extend_from_slice(&(envelope.len() as u16).to_be_bytes());
                body.extend_from_slice(envelope.as_bytes());
                body.extend_from_slice(payload);
                body
            }
            Frame::Subscribe { prefix } | Frame::Unsubscribe { prefix } => {
                prefix.as_bytes().to_vec()
            }
            Frame::Request { client_id, body } => {
                let mut out = Vec::with_capacity(2 + client_id.len() + body.len());
                out.extend_from_slice(&(client_id.len() as u16).to_be_bytes());
                out.extend_from_slice(client_id.as_bytes());
                out.extend_from_slice(body);
                out
            }
            Frame::Reply { body } => body.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let body = self.body();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(&body);
        let crc = hasher.finalize();

        let len = 1 + body.len() + 4;
        let mut out = Vec::with_capacity(4 + len);
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.push(kind);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed, or `None` when the
    /// buffer does not yet hold a complete frame.
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(len));
        }
        if len < 5 {
            return Err(Error::CorruptFrame("frame shorter than kind + crc"));
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }

        let kind = buf[4];
        let body = &buf[5..4 + len - 4];
        let crc_bytes = &buf[4 + len - 4..4 + len];
        let wire_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(body);
        if hasher.finalize() != wire_crc {
            return Err(Error::CorruptFrame("crc mismatch"));
        }

        let frame = match kind {
            KIND_MSG => {
                let (envelope, rest) = split_prefixed_str(body)?;
                Frame::Message { envelope, payload: rest.to_vec() }
            }
            KIND_SUB => Frame::Subscribe { prefix: body_as_str(body)? },
            KIND_UNSUB => Frame::Unsubscribe { prefix: body_as_str(body)? },
            KIND_REQ => {
                let (client_id, rest) = split_prefixed_str(body)?;
                Frame::Request { client_id, body: rest.to_vec() }
            }
            KIND_REP => Frame::Reply { body: body.to_vec() },
            _ => return Err(Error::CorruptFrame("unknown frame kind")),
        };
        Ok(Some((frame, 4 + len)))
    }
}

fn split_prefixed_str(body: &[u8]) -> Result<(String, &[u8])> {
    if body.len() < 2 {
        return Err(Error::CorruptFrame("missing string length"));
    }
    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + len {
        return Err(Error::CorruptFrame("string length out of bounds"));
    }
    let s = std::str::from_utf8(&body[2..2 + len])
        .map_err(|_| Error::CorruptFrame("string not utf8"))?;
    Ok((s.to_string(), &body[2 + len..]))
}

fn body_as_str(body: &[u8]) -> Result<String> {
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|_| Error::CorruptFrame("string not utf8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trip() {
        let frame = Frame::Message {
            envelope: "Scan2d_topo_5".into(),
            payload: b"{\"x\":1}".to_vec(),
        };
        let bytes = frame.encode();
        let (back, used) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(back, frame);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn all_kinds_round_trip() {
        let frames = [
            Frame::Subscribe { prefix: "Scan2d".into() },
            Frame::Unsubscribe { prefix: "".into() },
            Frame::Request { client_id: "worker1".into(), body: vec![1, 2, 3] },
            Frame::Reply { body: vec![9] },
        ];
        for frame in frames {
            let bytes = frame.encode();
            let (back, used) = Frame::decode(&bytes).unwrap().unwrap();
            assert_eq!(back, frame);
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn partial_frame_is_incomplete_not_error() {
        let bytes = Frame::Reply { body: vec![1, 2, 3, 4] }.encode();
        for cut in 0..bytes.len() {
            assert!(Frame::decode(&bytes[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn crc_flip_detected() {
        let mut bytes = Frame::Subscribe { prefix: "ScanState".into() }.encode();
        let last = bytes.len() - 6;
        bytes[last] ^= 0x40;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::CorruptFrame("crc mismatch"))
        ));
    }

    #[test]
    fn two_frames_back_to_back() {
        let a = Frame::Subscribe { prefix: "A".into() };
        let b = Frame::Reply { body: vec![7] };
        let mut bytes = a.encode();
        bytes.extend_from_slice(&b.encode());
        let (first, used) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(first, a);
        let (second, _) = Frame::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn oversized_length_rejected() {
        let mut bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        bytes.extend_from_slice(&[0; 16]);
        assert!(matches!(Frame::decode(&bytes), Err(Error::FrameTooLarge(_))));
    }
}
