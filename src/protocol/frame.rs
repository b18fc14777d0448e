use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Read one OT frame: `u16 length_le || length bytes`.
///
/// Returns `Ok(None)` on a clean close (EOF before the header, or a zero
/// length, which clients send on orderly shutdown). A peer vanishing
/// mid-frame is `Error::Truncated`.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u16::from_le_bytes(header) as usize;
    if len == 0 {
        return Ok(None);
    }

    let mut body = vec![0u8; len];
    match stream.read_exact(&mut body).await {
        Ok(_) => Ok(Some(Bytes::from(body))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::Truncated),
        Err(e) => Err(e.into()),
    }
}

/// Write one frame, prepending the u16 little-endian length.
pub async fn write_frame<W>(stream: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(body.len() <= u16::MAX as usize);
    stream.write_all(&(body.len() as u16).to_le_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
