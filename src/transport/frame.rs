//! Wire framing shared by every socket transport.
//!
//! One frame carries one message part:
//!
//! ```text
//! u64 LE frame_len | u8 kind | u8 priority | u8 has_topic | u32 LE flags | body
//! ```
//!
//! `frame_len` counts every byte after the length word. When `has_topic` is
//! set the body starts with the topic record — 8-byte little-endian topic
//! length, then the topic bytes with no trailing NUL — followed by the
//! payload; this is the on-wire form a Pub endpoint emits per publish.
//! Multipart chains travel as consecutive frames whose non-terminal parts
//! carry the MORE flag; stream readers reassemble the chain before
//! delivery.

use std::io::{self, Read, Write};

use crate::message::{Message, MessageFlags, MessageKind, Priority};

/// Bytes between the length word and the body.
const HEADER_LEN: usize = 7;

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Encode a single part (the chain, if any, is ignored).
pub(crate) fn encode(msg: &Message) -> Vec<u8> {
    let topic = msg.topic();
    let topic_bytes = topic.map(str::as_bytes).unwrap_or_default();
    let mut body_len = msg.payload().len();
    if topic.is_some() {
        body_len += 8 + topic_bytes.len();
    }
    let frame_len = HEADER_LEN + body_len;

    let mut buf = Vec::with_capacity(8 + frame_len);
    buf.extend_from_slice(&(frame_len as u64).to_le_bytes());
    buf.push(msg.kind().as_u8());
    buf.push(msg.priority().as_u8());
    buf.push(u8::from(topic.is_some()));
    buf.extend_from_slice(&msg.flags().bits().to_le_bytes());
    if topic.is_some() {
        buf.extend_from_slice(&(topic_bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(topic_bytes);
    }
    buf.extend_from_slice(msg.payload());
    buf
}

/// Decode one frame body (everything after the length word).
pub(crate) fn decode_body(frame: &[u8]) -> io::Result<Message> {
    if frame.len() < HEADER_LEN {
        return Err(invalid_data(format!(
            "frame body of {} bytes is shorter than the header",
            frame.len()
        )));
    }
    let kind = MessageKind::from_u8(frame[0]).map_err(|e| invalid_data(e.to_string()))?;
    let priority = Priority::from_u8(frame[1]).map_err(|e| invalid_data(e.to_string()))?;
    let has_topic = match frame[2] {
        0 => false,
        1 => true,
        other => return Err(invalid_data(format!("bad topic marker {other}"))),
    };
    let flags = MessageFlags::from_bits_truncate(u32::from_le_bytes(
        frame[3..7].try_into().expect("header slice"),
    ));
    let mut rest = &frame[HEADER_LEN..];

    let topic = if has_topic {
        if rest.len() < 8 {
            return Err(invalid_data("frame truncated inside topic length".into()));
        }
        let topic_len =
            u64::from_le_bytes(rest[..8].try_into().expect("topic length slice")) as usize;
        rest = &rest[8..];
        if rest.len() < topic_len {
            return Err(invalid_data(format!(
                "topic length {topic_len} exceeds remaining {} bytes",
                rest.len()
            )));
        }
        let topic = std::str::from_utf8(&rest[..topic_len])
            .map_err(|_| invalid_data("topic is not valid UTF-8".into()))?
            .to_string();
        rest = &rest[topic_len..];
        Some(topic)
    } else {
        None
    };

    Ok(Message::from_wire(
        kind,
        priority,
        topic,
        flags,
        rest.to_vec(),
    ))
}

/// Decode a whole datagram holding exactly one frame.
pub(crate) fn decode_datagram(datagram: &[u8], max_frame: usize) -> io::Result<Message> {
    if datagram.len() < 8 {
        return Err(invalid_data("datagram shorter than the length word".into()));
    }
    let frame_len =
        u64::from_le_bytes(datagram[..8].try_into().expect("length slice")) as usize;
    if frame_len > max_frame {
        return Err(invalid_data(format!(
            "frame of {frame_len} bytes exceeds the {max_frame} byte limit"
        )));
    }
    if datagram.len() - 8 != frame_len {
        return Err(invalid_data(format!(
            "datagram holds {} body bytes but declares {frame_len}",
            datagram.len() - 8
        )));
    }
    decode_body(&datagram[8..])
}

/// Read one frame from a stream.
pub(crate) fn read_message(reader: &mut dyn Read, max_frame: usize) -> io::Result<Message> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let frame_len = u64::from_le_bytes(len_bytes) as usize;
    if frame_len > max_frame {
        return Err(invalid_data(format!(
            "frame of {frame_len} bytes exceeds the {max_frame} byte limit"
        )));
    }
    let mut body = vec![0u8; frame_len];
    reader.read_exact(&mut body)?;
    decode_body(&body)
}

/// Read a frame and, when it carries MORE, the rest of its chain.
pub(crate) fn read_chain(reader: &mut dyn Read, max_frame: usize) -> io::Result<Message> {
    let mut parts = vec![read_message(reader, max_frame)?];
    while parts.last().expect("at least one part").flags().contains(MessageFlags::MORE) {
        parts.push(read_message(reader, max_frame)?);
    }
    let mut chain = None;
    while let Some(mut part) = parts.pop() {
        part.next = chain.map(Box::new);
        chain = Some(part);
    }
    Ok(chain.expect("chain is non-empty"))
}

/// Write every part of the chain as consecutive frames.
pub(crate) fn write_chain(writer: &mut dyn Write, msg: &Message) -> io::Result<()> {
    let mut cursor = Some(msg);
    while let Some(part) = cursor {
        writer.write_all(&encode(part))?;
        cursor = part.next_part();
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_plain_message() {
        let mut msg = Message::new(MessageKind::String, b"sunny".to_vec());
        msg.set_priority(Priority::High);

        let bytes = encode(&msg);
        let decoded = decode_datagram(&bytes, 1024).unwrap();
        assert_eq!(decoded.kind(), MessageKind::String);
        assert_eq!(decoded.priority(), Priority::High);
        assert_eq!(decoded.payload(), b"sunny");
        assert!(decoded.topic().is_none());
    }

    #[test]
    fn round_trips_topic_record() {
        let mut msg = Message::with_body(b"goal".to_vec());
        msg.set_topic("sports");

        let bytes = encode(&msg);
        // The topic record starts right after the 7-byte header: 8-byte LE
        // length, then the raw topic bytes without a NUL.
        assert_eq!(&bytes[8 + 7..8 + 7 + 8], &6u64.to_le_bytes());
        assert_eq!(&bytes[8 + 7 + 8..8 + 7 + 8 + 6], b"sports");

        let decoded = decode_datagram(&bytes, 1024).unwrap();
        assert_eq!(decoded.topic(), Some("sports"));
        assert_eq!(decoded.payload(), b"goal");
    }

    #[test]
    fn round_trips_multipart_chain_over_stream() {
        let mut msg = Message::with_body(b"part1".to_vec());
        msg.append_part(b"part2".to_vec(), MessageFlags::empty());
        msg.append_part(b"part3".to_vec(), MessageFlags::empty());

        let mut wire = Vec::new();
        write_chain(&mut wire, &msg).unwrap();

        let mut reader = Cursor::new(wire);
        let decoded = read_chain(&mut reader, 1024).unwrap();
        assert_eq!(decoded.part_count(), 3);
        assert!(decoded.validate_chain().is_ok());
        assert_eq!(decoded.payload(), b"part1");
        assert_eq!(
            decoded.next_part().unwrap().next_part().unwrap().payload(),
            b"part3"
        );
    }

    #[test]
    fn oversize_frames_are_rejected() {
        let msg = Message::with_body(vec![0u8; 128]);
        let bytes = encode(&msg);
        let err = decode_datagram(&bytes, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut reader = Cursor::new(bytes);
        let err = read_message(&mut reader, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_topic_is_rejected() {
        let mut msg = Message::with_body(b"x".to_vec());
        msg.set_topic("topic");
        let mut bytes = encode(&msg);
        bytes.truncate(bytes.len() - 4);
        // Fix up the length word to match the truncation.
        let new_len = (bytes.len() - 8) as u64;
        bytes[..8].copy_from_slice(&new_len.to_le_bytes());
        assert!(decode_datagram(&bytes, 1024).is_err());
    }
}
