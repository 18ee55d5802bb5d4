use crate::errors::{NetError, NetResult};
use crate::message::Message;
use std::io::{Read, Write};

/// Frames are `[length:u32 BE | opcode:u8 | body]`; the length covers the
/// opcode byte and the body.
pub const MAX_FRAME_SIZE: usize = 4 * 1024;

pub fn write_frame<W: Write>(writer: &mut W, msg: &Message) -> NetResult<()> {
    let body = msg.encode_body();
    let len = 1 + body.len();
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    writer.write_all(&(len as u32).to_be_bytes())?;
    writer.write_all(&[msg.opcode()])?;
    writer.write_all(&body)?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> NetResult<Message> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 {
        return Err(NetError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Message::decode(payload[0], &payload[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DisconnectReason;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        let msg = Message::Ping { nonce: 7 };
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).unwrap();
        // 4-byte length, 1-byte opcode, 8-byte nonce
        assert_eq!(buf.len(), 13);
        assert_eq!(&buf[..4], &9u32.to_be_bytes());
        let back = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn several_frames_stream() {
        let msgs = vec![
            Message::GetStats,
            Message::Disconnect {
                reason: DisconnectReason::Timeout,
            },
            Message::GetMainBlockHeader { height: 3 },
        ];
        let mut buf = Vec::new();
        for msg in &msgs {
            write_frame(&mut buf, msg).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        for msg in &msgs {
            assert_eq!(&read_frame(&mut cursor).unwrap(), msg);
        }
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            read_frame(&mut Cursor::new(buf)),
            Err(NetError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn zero_length_rejected() {
        let buf = 0u32.to_be_bytes().to_vec();
        assert!(matches!(
            read_frame(&mut Cursor::new(buf)),
            Err(NetError::EmptyFrame)
        ));
    }
}
