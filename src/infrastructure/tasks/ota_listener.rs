//! OTA listener task
//!
//! Receives a firmware image over a plain TCP connection and feeds it to
//! the [`OtaController`] chunk by chunk.
//!
//! Protocol:
//! ```text
//! client: SIZE=552672\n\n
//! device: OK\n
//! client: <raw image bytes>
//! device: PROGRESS=<n>\n   (repeated, up to 100)
//! ```
//!
//! Only one session is served per boot cycle: once the pipeline has been
//! launched the listener stops and the device restarts when the pipeline
//! is done.

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Timer, with_timeout};
use embedded_io_async::Write;
use log::{info, warn};

use crate::config::{OTA, OTA_CHUNK_SIZE};
use crate::controllers::OtaController;
use crate::infrastructure::services::wait_progress;

const RX_BUFFER_SIZE: usize = 4096;
const TX_BUFFER_SIZE: usize = 256;
const HEADER_BUFFER_SIZE: usize = 256;

#[derive(Debug)]
enum OtaNetError {
    Accept,
    Read,
    Write,
    /// Header missing, malformed or declaring an empty image
    Header,
    /// Connection closed before the whole image arrived
    Truncated { received: u32, expected: u32 },
    Rejected,
}

/// Image header sent before the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OtaHeader {
    size: u32,
}

impl OtaHeader {
    /// Parse `KEY=value` lines; unknown keys are ignored.
    fn parse(data: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(data).ok()?;
        let mut size = None;
        for line in text.lines() {
            if let Some((key, value)) = line.trim().split_once('=') {
                if key.trim() == "SIZE" {
                    size = value.trim().parse().ok();
                }
            }
        }
        Some(Self { size: size? })
    }
}

/// Position right after the blank line ending the header, if present.
fn header_end(data: &[u8]) -> Option<usize> {
    let lf = data.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[embassy_executor::task]
pub async fn ota_listener_task(stack: Stack<'static>, controller: &'static OtaController) {
    info!("ota: listening on port {}", OTA.port);

    loop {
        match handle_ota_connection(stack, controller).await {
            Ok(()) => info!("ota: image received"),
            Err(e) => warn!("ota: connection error: {:?}", e),
        }
        if controller.is_session_started() {
            info!("ota: session in progress, listener stopped");
            return;
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}

async fn handle_ota_connection(
    stack: Stack<'static>,
    controller: &OtaController,
) -> Result<(), OtaNetError> {
    let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TX_BUFFER_SIZE];

    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket.set_timeout(Some(OTA.socket_timeout));

    socket
        .accept(OTA.port)
        .await
        .map_err(|_| OtaNetError::Accept)?;
    info!("ota: connection accepted");

    let mut header = [0u8; HEADER_BUFFER_SIZE];
    let mut header_len = 0;
    let body_start = loop {
        match socket.read(&mut header[header_len..]).await {
            Ok(0) => return Err(OtaNetError::Header),
            Ok(n) => {
                header_len += n;
                if let Some(end) = header_end(&header[..header_len]) {
                    break end;
                }
                if header_len >= header.len() {
                    return Err(OtaNetError::Header);
                }
            }
            Err(_) => return Err(OtaNetError::Read),
        }
    };

    let parsed = OtaHeader::parse(&header[..body_start]).ok_or(OtaNetError::Header)?;
    if parsed.size == 0 {
        return Err(OtaNetError::Header);
    }

    socket
        .write_all(b"OK\n")
        .await
        .map_err(|_| OtaNetError::Write)?;
    controller.on_ota_start(parsed.size);

    let expected = parsed.size;
    let mut chunk = [0u8; OTA_CHUNK_SIZE];

    // Image bytes that arrived together with the header
    let early = &header[body_start..header_len];
    let early = &early[..early.len().min(expected as usize)];
    chunk[..early.len()].copy_from_slice(early);
    let mut filled = early.len();
    let mut received = early.len() as u32;

    loop {
        if filled == OTA_CHUNK_SIZE || (received == expected && filled > 0) {
            controller
                .on_ota_chunk(&chunk[..filled])
                .await
                .map_err(|e| {
                    warn!("ota: chunk dropped: {:?}", e);
                    OtaNetError::Rejected
                })?;
            filled = 0;
        }
        if received == expected {
            break;
        }

        let remaining = (expected - received) as usize;
        let want = remaining.min(OTA_CHUNK_SIZE - filled);
        let event = select(socket.read(&mut chunk[filled..filled + want]), wait_progress()).await;
        match event {
            Either::First(Ok(0)) => {
                return Err(OtaNetError::Truncated { received, expected });
            }
            Either::First(Ok(n)) => {
                filled += n;
                received += n as u32;
            }
            Either::First(Err(_)) => return Err(OtaNetError::Read),
            Either::Second(percent) => write_progress(&mut socket, percent).await?,
        }
    }

    // Report the remaining progress until the last chunk is flashed.
    let _ = with_timeout(OTA.socket_timeout, async {
        loop {
            let percent = wait_progress().await;
            write_progress(&mut socket, percent).await?;
            if percent >= 100 {
                return Ok::<(), OtaNetError>(());
            }
        }
    })
    .await;

    socket.close();
    let _ = socket.flush().await;
    Ok(())
}

async fn write_progress(socket: &mut TcpSocket<'_>, percent: u8) -> Result<(), OtaNetError> {
    let mut line = heapless::String::<16>::new();
    core::fmt::write(&mut line, format_args!("PROGRESS={percent}\n"))
        .map_err(|_| OtaNetError::Write)?;
    socket
        .write_all(line.as_bytes())
        .await
        .map_err(|_| OtaNetError::Write)
}
