//! Length-prefixed JSON framing over a `UnixStream` (spec §6): a 4-byte
//! big-endian length header followed by that many bytes of JSON, generalized
//! from the newline-delimited `serde_json` framing `daemon::send_ping` used
//! for its single fixed ping RPC.

use anyhow::{bail, Context, Result};
use codeintel_protocol::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

pub async fn read_request(reader: &mut OwnedReadHalf) -> Result<Option<Request>> {
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
    reader.read_exact(&mut payload).await.context("reading request payload")?;
    let request: Request = serde_json::from_slice(&payload).context("decoding request JSON")?;
    Ok(Some(request))
}

pub async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let payload = serde_json::to_vec(response)?;
    let len = u32::try_from(payload.len()).context("response larger than u32::MAX")?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
