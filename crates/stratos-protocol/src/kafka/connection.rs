//! Per-connection read-frame/dispatch/write-frame loop, routing every
//! supported API key through the dispatch table in [`super::dispatch`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use stratos_common::error::Result;

use super::codec;
use super::context::Context;
use super::dispatch;

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

/// One `tokio::spawn`-ed task per accepted TCP connection.
pub async fn handle_connection(mut socket: TcpStream, addr: SocketAddr, ctx: Arc<Context>) -> Result<()> {
    debug!(%addr, "kafka connection accepted");
    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

    loop {
        let n = socket.read_buf(&mut buffer).await?;
        if n == 0 {
            break;
        }

        while let Some(frame) = try_split_frame(&mut buffer) {
            let response = match dispatch_frame(&ctx, frame).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%addr, error = %e, "request dispatch failed, closing connection");
                    return Ok(());
                }
            };
            write_frame(&mut socket, &response).await?;
        }
    }

    debug!(%addr, "kafka connection closed");
    Ok(())
}

/// Splits one length-prefixed frame (`length: i32 | payload`) off the front
/// of `buffer` once it is fully buffered, leaving any trailing bytes for the
/// next iteration.
fn try_split_frame(buffer: &mut BytesMut) -> Option<BytesMut> {
    if buffer.len() < 4 {
        return None;
    }
    let size = (&buffer[..4]).get_i32() as usize;
    if buffer.len() < 4 + size {
        return None;
    }
    let mut frame = buffer.split_to(4 + size);
    frame.advance(4);
    Some(frame)
}

async fn dispatch_frame(ctx: &Arc<Context>, mut frame: BytesMut) -> Result<BytesMut> {
    let header = codec::decode_request_header(&mut frame)?;
    let correlation_id = header.correlation_id;
    let body = dispatch::dispatch(ctx.clone(), header, frame.freeze()).await;

    let mut out = BytesMut::new();
    out.put_i32(correlation_id);
    out.extend_from_slice(&body);
    Ok(out)
}

async fn write_frame(socket: &mut TcpStream, frame: &BytesMut) -> Result<()> {
    let mut header = BytesMut::with_capacity(4);
    header.put_i32(frame.len() as i32);
    socket.write_all(&header).await?;
    socket.write_all(frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_only_complete_frames() {
        let mut buffer = BytesMut::new();
        buffer.put_i32(3);
        buffer.extend_from_slice(b"ab"); // one byte short of complete
        assert!(try_split_frame(&mut buffer).is_none());

        buffer.extend_from_slice(b"c");
        let frame = try_split_frame(&mut buffer).expect("frame should be complete");
        assert_eq!(&frame[..], b"abc");
        assert!(buffer.is_empty());
    }
}
