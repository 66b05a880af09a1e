use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{CodecError, ConnectRequest, ConnectResponse};

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest body a frame can carry.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Prefix `body` with its length. Fails instead of truncating.
pub fn encode_frame(body: &[u8]) -> Result<Bytes, CodecError> {
    let len = u16::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
        size: body.len(),
        max: MAX_BODY_LEN,
    })?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body.len());
    buf.put_u16_le(len);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Write one length-prefixed frame and flush.
///
/// Prefix and body go out in a single write so TLS streams emit one record.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame body.
///
/// EOF before the declared length arrives surfaces as [`CodecError::Io`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut len_buf).await?;

    let len = u16::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_request<W>(writer: &mut W, req: &ConnectRequest) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_frame(writer, &req.encode()).await
}

pub async fn read_request<R>(reader: &mut R) -> Result<ConnectRequest, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let body = read_frame(reader).await?;
    ConnectRequest::decode(&body)
}

pub async fn write_response<W>(writer: &mut W, resp: &ConnectResponse) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_frame(writer, &resp.encode()).await
}

/// Read the relay's response frame. Rejections are returned as-is; the
/// caller decides how to treat them.
pub async fn read_response<R>(reader: &mut R) -> Result<ConnectResponse, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let body = read_frame(reader).await?;
    ConnectResponse::decode(&body)
}
