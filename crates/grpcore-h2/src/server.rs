//! Server connections and the TCP serve loop.

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, instrument, warn};

use grpcore_server::Server;
use grpcore_transport_traits::{
    Acceptor, BoxFuture, LogicalStream, StreamId, TransportError, TransportResult,
};

use crate::convert::metadata_from_request;
use crate::stream::{H2Inbound, H2Outbound};

/// Server side of an HTTP/2 connection.
///
/// A background task drives the connection and hands each peer-initiated
/// stream to [`accept`](Acceptor::accept). Dropping the acceptor starts a
/// graceful shutdown: streams already accepted run to completion.
#[derive(Debug)]
pub struct H2Acceptor {
    incoming: mpsc::UnboundedReceiver<TransportResult<LogicalStream>>,
}

impl H2Acceptor {
    /// Run the HTTP/2 server handshake over an accepted byte stream.
    pub async fn handshake<T>(io: T) -> TransportResult<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = h2::server::handshake(io)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (tx, incoming) = mpsc::unbounded_channel();
        tokio::spawn(drive(connection, tx));
        Ok(Self { incoming })
    }
}

impl Acceptor for H2Acceptor {
    fn accept(&mut self) -> BoxFuture<'_, Option<TransportResult<LogicalStream>>> {
        Box::pin(self.incoming.recv())
    }
}

async fn drive<T>(
    mut connection: h2::server::Connection<T, Bytes>,
    tx: mpsc::UnboundedSender<TransportResult<LogicalStream>>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut draining = false;
    loop {
        tokio::select! {
            accepted = connection.accept() => match accepted {
                Some(Ok((request, respond))) => {
                    let id = StreamId::new(respond.stream_id().as_u32());
                    let (parts, body) = request.into_parts();
                    let stream = LogicalStream {
                        id,
                        inbound: Box::new(H2Inbound::request(metadata_from_request(&parts), body)),
                        outbound: Box::new(H2Outbound::response(respond)),
                    };
                    if tx.send(Ok(stream)).is_err() && !draining {
                        draining = true;
                        connection.graceful_shutdown();
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "connection lost");
                    let _ = tx.send(Err(TransportError::ConnectionLost(e.to_string())));
                    return;
                }
                None => {
                    debug!("connection closed");
                    return;
                }
            },
            () = tx.closed(), if !draining => {
                debug!("acceptor dropped, draining connection");
                draining = true;
                connection.graceful_shutdown();
            }
        }
    }
}

/// Serve `server` on every connection `listener` accepts. Runs until the
/// returned future is dropped.
pub async fn serve(listener: TcpListener, server: Server) {
    serve_with_shutdown(listener, server, std::future::pending()).await;
}

/// Like [`serve`], stopping once `shutdown` resolves. Open connections are
/// aborted on shutdown.
pub async fn serve_with_shutdown<F>(listener: TcpListener, server: Server, shutdown: F)
where
    F: Future<Output = ()>,
{
    run(listener, server, None, shutdown).await;
}

/// Like [`serve_with_shutdown`], terminating TLS on every connection first.
pub async fn serve_tls<F>(listener: TcpListener, server: Server, tls: TlsAcceptor, shutdown: F)
where
    F: Future<Output = ()>,
{
    run(listener, server, Some(tls), shutdown).await;
}

#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
async fn run<F>(listener: TcpListener, server: Server, tls: Option<TlsAcceptor>, shutdown: F)
where
    F: Future<Output = ()>,
{
    info!(tls = tls.is_some(), "server listening");
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    if let Err(e) = tcp.set_nodelay(true) {
                        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let server = server.clone();
                    let tls = tls.clone();
                    connections.spawn(async move {
                        match tls {
                            None => serve_io(tcp, peer, server).await,
                            Some(tls) => match tls.accept(tcp).await {
                                Ok(io) => serve_io(io, peer, server).await,
                                Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                            },
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!("connection task panicked");
                }
            }
        }
    }

    debug!(active = connections.len(), "aborting open connections");
    connections.shutdown().await;
    info!("server stopped");
}

async fn serve_io<T>(io: T, peer: SocketAddr, server: Server)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!(%peer, "accepted connection");
    match H2Acceptor::handshake(io).await {
        Ok(acceptor) => server.serve_connection(acceptor).await,
        Err(e) => warn!(%peer, error = %e, "HTTP/2 handshake failed"),
    }
}
