use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Sanity bound on a single frame. Telemetry payloads are small; anything
/// near this size is a corrupt length prefix.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Write one length-prefixed frame: 4-byte LE length, then the payload.
pub async fn write_frame<W>(channel: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "refusing to write {} byte frame (limit {})",
            payload.len(),
            MAX_FRAME_BYTES
        )));
    }
    channel.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    channel.write_all(payload).await?;
    channel.flush().await?;
    Ok(())
}

/// Read one complete frame. Never surfaces a partial frame: loops until the
/// full payload arrived or the peer closed the channel.
///
/// Returns `EndOfStream` when the peer closes cleanly before any byte of a
/// frame, `TruncatedFrame` when it closes mid-frame.
pub async fn read_frame<R>(channel: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = channel.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                Error::EndOfStream
            } else {
                Error::TruncatedFrame
            });
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame length {} exceeds limit {}",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = channel.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(Error::TruncatedFrame);
        }
        filled += n;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_empty_small_large() {
        // Large payload exceeds one socket buffer, exercising the read loop.
        for payload in [vec![], vec![0x42], vec![7u8; 256 * 1024]] {
            let (mut a, mut b) = tokio::io::duplex(1024);
            let sent = payload.clone();
            let writer = tokio::spawn(async move {
                write_frame(&mut a, &sent).await.unwrap();
            });
            let got = read_frame(&mut b).await.unwrap();
            writer.await.unwrap();
            assert_eq!(got, payload);
        }
    }

    #[tokio::test]
    async fn test_sequential_frames_keep_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_frame(&mut a, b"first").await.unwrap();
            write_frame(&mut a, b"").await.unwrap();
            write_frame(&mut a, b"third frame").await.unwrap();
        });
        assert_eq!(read_frame(&mut b).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"third frame");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_is_end_of_stream() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(Error::EndOfStream)));
    }

    #[tokio::test]
    async fn test_close_mid_payload_is_truncated() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            // Announce 100 bytes, deliver 3, then close.
            a.write_all(&100u32.to_le_bytes()).await.unwrap();
            a.write_all(b"abc").await.unwrap();
        });
        assert!(matches!(read_frame(&mut b).await, Err(Error::TruncatedFrame)));
    }

    #[tokio::test]
    async fn test_close_mid_length_is_truncated() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            a.write_all(&[1u8, 0]).await.unwrap();
        });
        assert!(matches!(read_frame(&mut b).await, Err(Error::TruncatedFrame)));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        });
        assert!(matches!(read_frame(&mut b).await, Err(Error::Protocol(_))));
    }
}
