//! Network communication and appliance discovery module
//!
//! This module handles the UDP request/response exchange with appliances and
//! the broadcast search that finds them.

mod discovery;
mod transport;

pub use self::discovery::{DiscoveryService, Listener};
pub use self::transport::UdpTransport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Error, Result, TransportConfig};
use crate::protocol::{Command, Response};

/// Validated responses keyed by the address that sent them
pub type Responses = HashMap<SocketAddr, Response>;

/// One request/response exchange with appliances
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `command` to `target` and collects the validated replies.
    ///
    /// A unicast exchange returns as soon as one reply of the expected type
    /// arrives. A broadcast exchange keeps collecting from every sender
    /// until the line goes quiet. Either way an exchange that yields no
    /// usable reply fails with [`Error::NoResponse`].
    async fn send_command(
        &self,
        target: SocketAddr,
        command: Command,
        broadcast: bool,
    ) -> Result<Responses>;
}

/// Creates the transport each tracked appliance talks through
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

/// Factory producing real UDP transports
pub fn udp_transport_factory(config: TransportConfig) -> TransportFactory {
    Arc::new(move || Arc::new(UdpTransport::new(config.clone())) as Arc<dyn Transport>)
}

/// Accepts `response` only if it is the reply `command` expects
pub(crate) fn check_response(command: &Command, response: Response) -> Result<Response> {
    let expected = command.expected_response();
    if response.id() == expected {
        Ok(response)
    } else {
        Err(Error::UnexpectedResponse {
            expected,
            actual: response.id(),
        })
    }
}
