//! Length-prefixed (4 bytes LE) bincode frames.

use crate::error::RpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_SIZE: usize = 4;

/// Largest payload preallocated for on a declared length; bigger frames grow
/// as their bytes arrive.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Default cap on an incoming frame. Uploads carry whole map packs.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, RpcError> {
    let payload = bincode::serialize(msg).map_err(RpcError::Encode)?;
    let len = u32::try_from(payload.len()).map_err(|_| RpcError::TooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one frame of at most `max_len` payload bytes. `None` means the
/// peer closed cleanly between frames.
///
/// The declared length is checked before anything is allocated and the
/// buffer only grows with bytes actually received.
pub async fn read_frame<R, T>(r: &mut R, max_len: usize) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; LEN_SIZE];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_len {
        return Err(RpcError::TooLarge(len));
    }

    let mut payload = Vec::with_capacity(len.min(INITIAL_CAPACITY));
    r.take(len as u64).read_to_end(&mut payload).await?;
    if payload.len() < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame truncated at {} of {} bytes", payload.len(), len),
        )
        .into());
    }
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(RpcError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::rpc::RpcRequest;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let upload = RpcRequest::Upload {
            name: "mymap.pk3".into(),
            data: vec![1, 2, 3],
        };
        write_frame(&mut client, &upload).await.unwrap();
        write_frame(&mut client, &RpcRequest::Health).await.unwrap();
        drop(client);

        let first: Option<RpcRequest> = read_frame(&mut server, 1024).await.unwrap();
        assert!(matches!(first, Some(RpcRequest::Upload { ref data, .. }) if data == &[1, 2, 3]));
        let second: Option<RpcRequest> = read_frame(&mut server, 1024).await.unwrap();
        assert!(matches!(second, Some(RpcRequest::Health)));
        let end: Option<RpcRequest> = read_frame(&mut server, 1024).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Only the header is sent; the reader must bail without waiting
        // for (or allocating) the declared payload.
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let result = read_frame::<_, RpcRequest>(&mut server, DEFAULT_MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(RpcError::TooLarge(len)) if len == u32::MAX as usize));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&(1024u32 * 1024).to_le_bytes()).await.unwrap();
        client.write_all(&[0u8; 10]).await.unwrap();
        drop(client);

        let result = read_frame::<_, RpcRequest>(&mut server, DEFAULT_MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(RpcError::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_partial_header_is_clean_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[1, 0]).await.unwrap();
        drop(client);

        let result: Option<RpcRequest> = read_frame(&mut server, 1024).await.unwrap();
        assert!(result.is_none());
    }
}
