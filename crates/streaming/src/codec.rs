//! Length-delimited bincode framing.
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of
//! bincode. Frames are read with `read_exact` straight off the socket (no
//! read-ahead buffer) so raw file bytes that follow a frame stay in the
//! stream for the caller.

use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, StreamingError};
use crate::protocol::Datagram;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Largest failure-detector datagram we expect to receive.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Encode `value` as a complete frame (prefix included).
pub fn encode_frame<T: Serialize>(value: &T) -> Result<BytesMut> {
    let body = bincode::serialize(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(StreamingError::FrameTooLarge(body.len()));
    }

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    Ok(frame)
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(StreamingError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

pub fn encode_datagram(datagram: &Datagram) -> Result<Vec<u8>> {
    Ok(bincode::serialize(datagram)?)
}

pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FileMessage, MembershipMessage, Message};
    use corelib::MemberIdentity;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_frame_leaves_trailing_bytes_unread() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let message = Message::File(FileMessage::ok().with_file("a_1.txt"));
        write_frame(&mut client, &message).await.unwrap();
        client.write_all(b"raw-bytes").await.unwrap();
        drop(client);

        let decoded: Message = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, message);

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"raw-bytes");
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();

        let result: Result<Message> = read_frame(&mut server).await;
        assert!(matches!(result, Err(StreamingError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let result: Result<Message> = read_frame(&mut server).await;
        assert!(matches!(result, Err(StreamingError::Io(_))));
    }

    #[test]
    fn test_datagram_keeps_sequence() {
        let datagram = Datagram {
            seq: 42,
            message: MembershipMessage::Ping(MemberIdentity::new("h", 1, 1)),
        };
        let decoded = decode_datagram(&encode_datagram(&datagram).unwrap()).unwrap();
        assert_eq!(decoded.seq, 42);
    }
}
