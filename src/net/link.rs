// TCP ranging link
// Keeps a connection to the anchor network gateway and bridges it to the survey command queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::{HEARTBEAT_INTERVAL_SECS, RECONNECT_DELAY_SECS};
use crate::error::{SurveyError, SurveyResult};
use crate::geometry::{self, Point};
use crate::link::RangingLink;
use crate::net::connection::Connection;
use crate::net::messages::{parse_frame, Frame, LinkMessage};
use crate::orchestrator::SurveyHandle;

/// Why a connection ended
enum SessionEnd {
    /// Peer closed or the socket failed; reconnect
    Disconnected,
    /// The survey side is gone; stop for good
    Shutdown,
}

/// `RangingLink` over a line-delimited TCP connection to the gateway.
///
/// A background task owns the socket and reconnects every few seconds after
/// a disconnect. Inbound frames are handed to the survey through its
/// `SurveyHandle`; outbound messages are queued to the task.
pub struct TcpRangingLink {
    outbound: mpsc::UnboundedSender<LinkMessage>,
    connected: Arc<AtomicBool>,
}

impl TcpRangingLink {
    /// Start the connection task for `addr` (host:port). Must be called inside a tokio runtime.
    pub fn spawn(addr: String, handle: SurveyHandle) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        tokio::spawn(async move {
            run_link(addr, rx, handle, flag).await;
        });

        TcpRangingLink { outbound, connected }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, message: LinkMessage) -> SurveyResult<()> {
        if !self.is_connected() {
            return Err(SurveyError::LinkDown);
        }
        self.outbound.send(message).map_err(|_| SurveyError::LinkDown)
    }
}

impl RangingLink for TcpRangingLink {
    fn send_range_request(
        &mut self,
        anchor_a: &str,
        anchor_b: &str,
        repetitions: u32,
        delay_ms: u32,
    ) -> SurveyResult<()> {
        self.send(LinkMessage::Range {
            anchor: anchor_a.to_string(),
            target: anchor_b.to_string(),
            repetitions,
            delay_ms,
        })
    }

    fn publish_position(&mut self, anchor_id: &str, position: &Point) -> SurveyResult<()> {
        self.send(LinkMessage::AnchorPosition {
            anchorid: anchor_id.to_string(),
            position: geometry::to_array(position),
        })
    }
}

/// Connect, serve, and reconnect until the survey goes away
async fn run_link(
    addr: String,
    mut outbound: mpsc::UnboundedReceiver<LinkMessage>,
    handle: SurveyHandle,
    connected: Arc<AtomicBool>,
) {
    info!("Starting anchor network link to {}", addr);

    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let peer = match stream.peer_addr() {
                    Ok(peer) => peer,
                    Err(e) => {
                        warn!("Connected to {} but peer address is unavailable: {}", addr, e);
                        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                        continue;
                    }
                };
                info!("Connected to anchor network at {}", peer);

                // Requests queued before the reconnect are stale
                while outbound.try_recv().is_ok() {}

                connected.store(true, Ordering::Release);
                handle.resume();
                let end = serve(Connection::new(stream, peer), &mut outbound, &handle).await;
                connected.store(false, Ordering::Release);

                match end {
                    SessionEnd::Shutdown => {
                        info!("Anchor network link to {} closed", addr);
                        return;
                    }
                    SessionEnd::Disconnected => warn!("Lost anchor network link to {}", addr),
                }
            }
            Err(e) => {
                warn!("Failed to connect to anchor network at {}: {}", addr, e);
            }
        }

        if handle.is_closed() {
            return;
        }

        // Wait before reconnecting
        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn serve(
    mut conn: Connection,
    outbound: &mut mpsc::UnboundedReceiver<LinkMessage>,
    handle: &SurveyHandle,
) -> SessionEnd {
    let heartbeat = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = conn.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !dispatch(&line, handle) {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(None) => {
                        info!("Anchor network at {} closed the connection", conn.peer_addr());
                        return SessionEnd::Disconnected;
                    }
                    Err(e) => {
                        warn!("Read error from {}: {}", conn.peer_addr(), e);
                        return SessionEnd::Disconnected;
                    }
                }
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = conn.write_message(&message).await {
                    warn!("Failed to write to {}: {}", conn.peer_addr(), e);
                    return SessionEnd::Disconnected;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = conn.write_message(&LinkMessage::Heartbeat {}).await {
                    warn!("Failed to send heartbeat to {}: {}", conn.peer_addr(), e);
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}

/// Hand one inbound line to the survey. Returns false once the survey is gone.
fn dispatch(line: &str, handle: &SurveyHandle) -> bool {
    let frame = match parse_frame(line) {
        Ok(Some(frame)) => frame,
        Ok(None) => return true,
        Err(e) => {
            warn!("Bad packet: {}", e);
            return true;
        }
    };

    match frame {
        Frame::Tag(tag) => handle.submit_tag_position(tag),
        Frame::Link(LinkMessage::RangeResult { anchor, target, distance, errors }) => {
            handle.submit_survey_result(&anchor, &target, distance, errors)
        }
        Frame::Link(LinkMessage::Anchor { anchorid }) => handle.submit_anchor(&anchorid),
        Frame::Link(LinkMessage::Heartbeat {}) => {
            debug!("Heartbeat from anchor network");
            true
        }
        Frame::Link(other) => {
            warn!("Ignoring outbound-only message from anchor network: {:?}", other);
            true
        }
    }
}
