use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::core::{Error, Result, TransportConfig};
use crate::protocol::{Command, Frame, FrameCodec, FRAME_LEN};
use super::{check_response, Responses, Transport};

/// Room for oversized datagrams so they fail the length check instead of
/// being silently truncated to a valid frame
const RECV_BUFFER_LEN: usize = 4 * FRAME_LEN;

/// UDP transport to fireplace appliances.
///
/// Every exchange binds its own ephemeral socket before sending, and
/// exchanges through one transport never overlap.
pub struct UdpTransport {
    /// Configuration
    config: TransportConfig,
    /// Held for a whole send-then-collect cycle
    exchange: Mutex<()>,
}

impl UdpTransport {
    /// Creates a new UDP transport
    pub fn new(config: TransportConfig) -> Self {
        UdpTransport {
            config,
            exchange: Mutex::new(()),
        }
    }

    /// Binds a receive socket suitable for talking to `target`
    fn bind(target: SocketAddr, broadcast: bool) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;

        let local = match target {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        socket.bind(&local.into())?;

        Ok(UdpSocket::from_std(socket.into())?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_command(
        &self,
        target: SocketAddr,
        command: Command,
        broadcast: bool,
    ) -> Result<Responses> {
        let _exchange = self.exchange.lock().await;

        let mut codec = FrameCodec::new();
        let mut request = BytesMut::with_capacity(FRAME_LEN);
        codec.encode(Frame::Command(command), &mut request)?;

        let socket = Self::bind(target, broadcast)?;
        socket.send_to(&request, target).await?;
        trace!(%target, ?command, broadcast, "Sent command");

        let timeout = self.config.request_timeout;
        let mut deadline = Instant::now() + timeout;
        let mut responses = Responses::new();
        let mut buf = [0u8; RECV_BUFFER_LEN];

        loop {
            let (len, from) = match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                // Stray ICMP errors surface here on some platforms
                Ok(Err(e)) => {
                    debug!(%target, error = %e, "Receive failed");
                    continue;
                }
                Err(_) => break,
            };

            let mut datagram = BytesMut::from(&buf[..len]);
            let frame = match codec.decode_eof(&mut datagram) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%from, error = %e, "Discarding malformed frame");
                    continue;
                }
            };

            let response = match frame {
                Frame::Response(response) => response,
                Frame::Command(echo) => {
                    trace!(%from, ?echo, "Ignoring echoed command");
                    continue;
                }
            };

            match check_response(&command, response) {
                Ok(response) => {
                    trace!(%from, ?response, "Received response");
                    if !broadcast {
                        responses.insert(from, response);
                        break;
                    }
                    // Every new responder buys the stragglers another window
                    if responses.insert(from, response).is_none() {
                        deadline = Instant::now() + timeout;
                    }
                }
                Err(e) => warn!(%from, error = %e, "Discarding response"),
            }
        }

        if responses.is_empty() {
            return Err(Error::NoResponse {
                command: command.id(),
                addr: target,
                timeout,
            });
        }

        Ok(responses)
    }
}
