//! SSH local port forwarding
//!
//! The tunnel listens on an ephemeral loopback port and forwards every
//! accepted socket through a `direct-tcpip` channel of one SSH session to the
//! database host. Dropping the tunnel stops the forwarder and every in-flight
//! forwarded socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument, trace, warn};

use super::{ConnectionError, TunnelAuth, TunnelConfig};

/// Upper bound for establishing and authenticating the SSH session
pub const TUNNEL_DIAL_TIMEOUT: Duration = Duration::from_secs(40);

struct TunnelHandler;

#[async_trait]
impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    // host keys are not pinned
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SshTunnel {
    local_addr: SocketAddr,
    session: Arc<client::Handle<TunnelHandler>>,
    forwarder: JoinHandle<()>,
}

impl SshTunnel {
    /// Open an SSH session and start forwarding to `remote_host:remote_port`
    #[instrument(skip(config), fields(bastion = %config.host))]
    pub async fn open(
        config: &TunnelConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self, ConnectionError> {
        let session = tokio::time::timeout(TUNNEL_DIAL_TIMEOUT, Self::connect(config))
            .await
            .map_err(|_| {
                ConnectionError::Tunnel(format!(
                    "timed out after {}s connecting to {}:{}",
                    TUNNEL_DIAL_TIMEOUT.as_secs(),
                    config.host,
                    config.port
                ))
            })??;
        let session = Arc::new(session);

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ConnectionError::Tunnel(format!("failed to bind local port: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ConnectionError::Tunnel(format!("failed to bind local port: {e}")))?;

        debug!("forwarding {local_addr} to {remote_host}:{remote_port}");

        let forwarder = tokio::spawn(forward(
            listener,
            session.clone(),
            remote_host.to_string(),
            remote_port,
        ));

        Ok(Self {
            local_addr,
            session,
            forwarder,
        })
    }

    async fn connect(config: &TunnelConfig) -> Result<client::Handle<TunnelHandler>, ConnectionError> {
        let ssh_config = Arc::new(client::Config::default());

        let mut session = client::connect(
            ssh_config,
            (config.host.as_str(), config.port),
            TunnelHandler,
        )
        .await
        .map_err(|e| ConnectionError::Tunnel(format!("failed to connect: {e}")))?;

        let authenticated = match &config.auth {
            TunnelAuth::Password(password) => session
                .authenticate_password(config.user.as_str(), password.as_str())
                .await
                .map_err(|e| ConnectionError::Tunnel(format!("authentication failed: {e}")))?,
            TunnelAuth::PrivateKey(pem) => {
                let key = russh_keys::decode_secret_key(pem, None)
                    .map_err(|e| ConnectionError::Tunnel(format!("invalid private key: {e}")))?;
                session
                    .authenticate_publickey(config.user.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| ConnectionError::Tunnel(format!("authentication failed: {e}")))?
            }
        };

        if !authenticated {
            return Err(ConnectionError::Tunnel(format!(
                "authentication rejected for user {}",
                config.user
            )));
        }

        Ok(session)
    }

    /// Loopback address the database client should connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop forwarding and disconnect the SSH session
    pub async fn close(self) {
        self.forwarder.abort();
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            trace!("ssh disconnect failed: {e}");
        }
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward(
    listener: TcpListener,
    session: Arc<client::Handle<TunnelHandler>>,
    remote_host: String,
    remote_port: u16,
) {
    // owned here so aborting the forwarder also aborts every forwarded socket
    let mut connections = JoinSet::new();

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("tunnel listener failed: {e}");
                break;
            }
        };

        let channel = match session
            .channel_open_direct_tcpip(
                remote_host.as_str(),
                u32::from(remote_port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!("failed to open ssh channel to {remote_host}:{remote_port}: {e}");
                continue;
            }
        };

        connections.spawn(async move {
            let mut stream = channel.into_stream();
            if let Err(e) = tokio::io::copy_bidirectional(&mut socket, &mut stream).await {
                trace!("forwarded connection closed: {e}");
            }
        });

        // reap finished connections
        while connections.try_join_next().is_some() {}
    }
}
