use crate::error::{NetError, NetResult};
use pastry_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected outright rather than allocating an
/// attacker-controlled buffer size.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Read one length-prefixed, bincode-encoded [`Message`] from `reader`.
/// Rejects truncated frames (the read simply errors before a full frame
/// arrives) and frames claiming to exceed [`MAX_FRAME_BYTES`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> NetResult<Message> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NetError::Codec(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| NetError::Codec(e.to_string()))
}

/// Write `message` to `writer` as a length-prefixed, bincode-encoded frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> NetResult<()> {
    let body = bincode::serialize(message).map_err(|e| NetError::Codec(e.to_string()))?;
    if body.len() > MAX_FRAME_BYTES as usize {
        return Err(NetError::Codec(format!(
            "encoded frame of {} bytes exceeds the {MAX_FRAME_BYTES} byte limit",
            body.len()
        )));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
