//! Client connections.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use h2::client::SendRequest;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use grpcore_transport_traits::{
    BoxFuture, ChannelOptions, CloseReason, Connection, ConnectionState, Connector, Credentials,
    Endpoint, LogicalStream, Metadata, StreamId, TransportError, TransportResult,
};

use crate::convert::{from_h2, request_from_metadata};
use crate::stream::{H2Inbound, H2Outbound};
use crate::tls;

#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    closed: watch::Sender<Option<CloseReason>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn set_closed(&self, reason: CloseReason) {
        self.closed.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// A client HTTP/2 connection.
///
/// A background task drives the connection; it ends when the peer closes,
/// the connection fails, or [`terminate`](Connection::terminate) is called.
#[derive(Debug)]
pub struct H2Connection {
    sender: Mutex<Option<SendRequest<Bytes>>>,
    shared: Arc<Shared>,
}

impl H2Connection {
    /// Run the HTTP/2 client handshake over an established byte stream.
    pub async fn handshake<T>(io: T) -> TransportResult<Arc<Self>>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, connection) = h2::client::handshake(io)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (closed, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Open),
            closed,
            shutdown: CancellationToken::new(),
        });

        let driver = Arc::clone(&shared);
        tokio::spawn(async move {
            let result = tokio::select! {
                result = connection => result,
                () = driver.shutdown.cancelled() => Ok(()),
            };
            {
                let mut state = driver.state.lock();
                if matches!(*state, ConnectionState::Open | ConnectionState::Draining) {
                    *state = match &result {
                        Ok(()) => ConnectionState::Closed,
                        Err(e) => ConnectionState::Failed {
                            reason: e.to_string(),
                        },
                    };
                }
            }
            let reason = match result {
                Ok(()) => {
                    debug!("connection closed");
                    CloseReason::PeerClosed
                }
                Err(e) => {
                    warn!(error = %e, "connection lost");
                    CloseReason::Error(from_h2(e))
                }
            };
            driver.set_closed(reason);
        });

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            shared,
        }))
    }
}

impl Connection for H2Connection {
    fn open_stream(&self, headers: Metadata) -> BoxFuture<'_, TransportResult<LogicalStream>> {
        Box::pin(async move {
            if !self.shared.state.lock().accepts_streams() {
                return Err(TransportError::ConnectionClosed);
            }
            let sender = self
                .sender
                .lock()
                .clone()
                .ok_or(TransportError::ConnectionClosed)?;
            let request = request_from_metadata(&headers)?;

            let mut sender = sender.ready().await.map_err(from_h2)?;
            let (response, body) = sender.send_request(request, false).map_err(from_h2)?;
            let id = StreamId::new(body.stream_id().as_u32());
            debug!(stream = %id, "stream opened");

            Ok(LogicalStream {
                id,
                inbound: Box::new(H2Inbound::response(response)),
                outbound: Box::new(H2Outbound::request(body)),
            })
        })
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    fn finish(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == ConnectionState::Open {
                *state = ConnectionState::Draining;
            }
        }
        // The connection ends once the last request handle and stream are gone.
        self.sender.lock().take();
        self.shared.set_closed(CloseReason::Local);
    }

    fn terminate(&self) {
        *self.shared.state.lock() = ConnectionState::Closed;
        self.sender.lock().take();
        self.shared.set_closed(CloseReason::Local);
        self.shared.shutdown.cancel();
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        let mut rx = self.shared.closed.subscribe();
        Box::pin(async move {
            match rx.wait_for(Option::is_some).await {
                Ok(reason) => reason.clone().unwrap_or(CloseReason::Local),
                Err(_) => CloseReason::Local,
            }
        })
    }
}

/// Dials `host:port` over TCP and, for secure credentials, rustls with
/// ALPN `h2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct H2Connector;

impl H2Connector {
    /// Create a connector.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for H2Connector {
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ChannelOptions,
    ) -> TransportResult<Arc<dyn Connection>> {
        let host = endpoint.host.trim_start_matches('[').trim_end_matches(']');
        let tcp = TcpStream::connect((host, endpoint.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{endpoint}: {e}")))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let connection: Arc<dyn Connection> = match &options.credentials {
            Credentials::Insecure => H2Connection::handshake(tcp).await?,
            Credentials::Secure { tls, check } => {
                let authority = options
                    .authority
                    .clone()
                    .unwrap_or_else(|| endpoint.authority());
                let config = tls::client_config(tls, check.clone(), &authority)?;
                let server_name = tls::server_name(tls, endpoint)?;
                let stream = TlsConnector::from(Arc::new(config))
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                if stream.get_ref().1.alpn_protocol() != Some(tls::ALPN_H2) {
                    warn!("peer did not negotiate h2 via ALPN");
                }
                H2Connection::handshake(stream).await?
            }
        };

        info!("connected");
        Ok(connection)
    }
}
