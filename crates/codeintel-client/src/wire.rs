//! Mirrors `codeintel-driver::wire`'s length-prefixed JSON framing from the
//! other end of the socket: the client writes `Request`s and reads
//! `Response`s instead of the reverse.

use anyhow::{bail, Context, Result};
use codeintel_protocol::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

pub async fn write_request(writer: &mut OwnedWriteHalf, request: &Request) -> Result<()> {
    let payload = serde_json::to_vec(request)?;
    let len = u32::try_from(payload.len()).context("request larger than u32::MAX")?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_response(reader: &mut OwnedReadHalf) -> Result<Option<Response>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        bail!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.context("reading response payload")?;
    let response: Response = serde_json::from_slice(&payload).context("decoding response JSON")?;
    Ok(Some(response))
}
