use std::{borrow::Cow, io, net::SocketAddr, num::NonZeroUsize, sync::Arc};

use comms::{
    OnoReceiver, OnoSender, PROTOCOL_VERSION,
    msg::{Command, Msg, Payload},
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, ToSocketAddrs},
    sync::Semaphore,
    task::{self, JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;

use crate::{MergeErr, MergeService, Result};

/// A running merge server, dropping it does not stop it.
#[derive(Debug)]
pub struct ServiceHandle {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections, closes the open ones and waits for the server to finish.
    pub async fn stop(self) {
        self.cancel.cancel();

        if let Err(e) = self.task.await {
            error!("merge server task failed: {e}");
        }

        info!("merge server at {} stopped", self.addr);
    }
}

/// Exposes a `MergeService` over tcp.
pub struct MergeServer;

impl MergeServer {
    /// Binds the server and starts serving connections in the background.
    ///
    /// # Arguments
    /// * `service` - The service every connection merges into.
    /// * `addr` - The address to bind to.
    /// * `handlers` - The maximum amount of merges in flight at the same time.
    ///
    /// # Returns
    /// A handle to stop the server, or an io error if the address could not be bound.
    pub async fn start<A: ToSocketAddrs>(
        service: Arc<MergeService>,
        addr: A,
        handlers: NonZeroUsize,
    ) -> io::Result<ServiceHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(handlers.get()));

        info!("merge server listening at {addr} with {handlers} handlers");
        let task = tokio::spawn(serve(listener, service, permits, cancel.clone()));

        Ok(ServiceHandle { addr, cancel, task })
    }
}

async fn serve(
    listener: TcpListener,
    service: Arc<MergeService>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("connection from {peer}");
                    let (rx, tx) = stream.into_split();
                    let (rx, tx) = comms::channel(rx, tx);
                    let service = Arc::clone(&service);
                    let permits = Arc::clone(&permits);

                    tasks.spawn(async move {
                        let res = handle_connection(rx, tx, &service, &permits).await;
                        (peer, res)
                    });
                }
                Err(e) => warn!("failed to accept connection: {e}"),
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok((peer, Ok(()))) => debug!("connection from {peer} closed"),
                Ok((peer, Err(e))) => warn!("connection from {peer} failed: {e}"),
                Err(e) => error!("connection task failed: {e}"),
            },
        }
    }

    permits.close();
    tasks.shutdown().await;
}

/// Serves a single connection until the peer disconnects.
///
/// The first message must be a `Connect` handshake with this side's protocol version, it is
/// answered with the same message. Malformed merges get an error reply and the connection stays
/// open.
///
/// # Arguments
/// * `rx` - The receiving end of the connection.
/// * `tx` - The sending end of the connection.
/// * `service` - The service to merge into.
/// * `permits` - Bounds the amount of merges in flight.
///
/// # Returns
/// An error if the peer broke the protocol or the connection failed.
pub async fn handle_connection<R, W>(
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    service: &MergeService,
    permits: &Semaphore,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf: Vec<u32> = Vec::new();

    match rx.recv_into(&mut buf).await? {
        Msg::Control(Command::Connect { version }) if version == PROTOCOL_VERSION => {
            let msg = Msg::Control(Command::Connect {
                version: PROTOCOL_VERSION,
            });
            tx.send(&msg).await?;
        }
        Msg::Control(Command::Connect { version }) => {
            let err = MergeErr::VersionMismatch {
                got: version,
                expected: PROTOCOL_VERSION,
            };
            tx.send(&Msg::Err(Cow::Owned(err.to_string()))).await?;
            return Err(err);
        }
        msg => {
            let err = MergeErr::Protocol(format!("expected a handshake, got {}", msg.kind()));
            tx.send(&Msg::Err(Cow::Owned(err.to_string()))).await?;
            return Err(err);
        }
    }

    loop {
        let request = match rx.recv_into(&mut buf).await {
            Ok(Msg::Data(Payload::MergeRequest(request))) => request,
            Ok(Msg::Control(Command::Disconnect)) => break,
            Ok(msg) => {
                let err = MergeErr::Protocol(format!("unexpected message {}", msg.kind()));
                tx.send(&Msg::Err(Cow::Owned(err.to_string()))).await?;
                return Err(err);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer closed the connection without disconnecting");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let permit = permits.acquire().await.map_err(|_| MergeErr::Closed)?;
        let merged = task::block_in_place(|| service.merge(&request));
        drop(permit);

        match merged {
            Ok(response) => tx.send(&Msg::Data(Payload::MergeResponse(response))).await?,
            Err(e) => {
                warn!("rejected merge: {e}");
                tx.send(&Msg::Err(Cow::Owned(e.to_string()))).await?;
            }
        }
    }

    tx.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use comms::MergeMessage;
    use ndarray::{Array2, array};
    use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::ConvergencePolicy;

    type Channel = (
        OnoReceiver<ReadHalf<DuplexStream>>,
        OnoSender<WriteHalf<DuplexStream>>,
    );

    fn channel_pair() -> (Channel, Channel) {
        let (stream1, stream2) = io::duplex(4096);
        let (rx1, tx1) = io::split(stream1);
        let (rx2, tx2) = io::split(stream2);
        (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
    }

    fn service() -> Arc<MergeService> {
        Arc::new(MergeService::new(
            vec![array![[0.0, 1.0]]],
            NonZeroUsize::new(1).unwrap(),
            ConvergencePolicy {
                check_interval: NonZeroU64::new(100).unwrap(),
                merge_limit: 100,
                error_threshold: 0.,
            },
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handshake_merge_and_disconnect() -> io::Result<()> {
        let ((mut rx, mut tx), (srv_rx, srv_tx)) = channel_pair();
        let service = service();
        let permits = Semaphore::new(1);

        let client = async {
            let mut buf: Vec<u32> = Vec::new();
            tx.send(&Msg::Control(Command::Connect {
                version: PROTOCOL_VERSION,
            }))
            .await?;
            assert!(matches!(
                rx.recv_into(&mut buf).await?,
                Msg::Control(Command::Connect { .. })
            ));

            let request =
                MergeMessage::request(0.5, vec![array![[1.0, 1.0]]], vec![Array2::zeros((1, 2))]);
            tx.send(&Msg::Data(Payload::MergeRequest(request))).await?;
            match rx.recv_into(&mut buf).await? {
                Msg::Data(Payload::MergeResponse(response)) => {
                    assert_eq!(response.matrices, vec![array![[1.0, 2.0]]]);
                    assert!(!response.converged);
                }
                other => panic!("unexpected {other:?}"),
            }

            let malformed = MergeMessage::request(0.5, vec![], vec![]);
            tx.send(&Msg::Data(Payload::MergeRequest(malformed))).await?;
            assert!(matches!(rx.recv_into(&mut buf).await?, Msg::Err(_)));

            tx.send(&Msg::Control(Command::Disconnect)).await?;
            io::Result::Ok(())
        };

        let (client, server) = tokio::join!(
            client,
            handle_connection(srv_rx, srv_tx, &service, &permits)
        );
        client?;
        server?;

        assert_eq!(service.merge_count(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn version_mismatch_is_rejected() -> io::Result<()> {
        let ((mut rx, mut tx), (srv_rx, srv_tx)) = channel_pair();
        let service = service();
        let permits = Semaphore::new(1);

        tx.send(&Msg::Control(Command::Connect {
            version: PROTOCOL_VERSION + 1,
        }))
        .await?;

        let res = handle_connection(srv_rx, srv_tx, &service, &permits).await;
        assert!(matches!(res, Err(MergeErr::VersionMismatch { .. })));

        let mut buf: Vec<u32> = Vec::new();
        assert!(matches!(rx.recv_into(&mut buf).await?, Msg::Err(_)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_over_tcp_until_stopped() -> io::Result<()> {
        let service = service();
        let handle =
            MergeServer::start(Arc::clone(&service), "127.0.0.1:0", NonZeroUsize::MIN).await?;

        let stream = tokio::net::TcpStream::connect(handle.local_addr()).await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);
        let mut buf: Vec<u32> = Vec::new();

        tx.send(&Msg::Control(Command::Connect {
            version: PROTOCOL_VERSION,
        }))
        .await?;
        let _: Msg = rx.recv_into(&mut buf).await?;

        let request =
            MergeMessage::request(0.5, vec![array![[2.0, 2.0]]], vec![Array2::zeros((1, 2))]);
        tx.send(&Msg::Data(Payload::MergeRequest(request))).await?;
        assert!(matches!(
            rx.recv_into(&mut buf).await?,
            Msg::Data(Payload::MergeResponse(_))
        ));
        tx.send(&Msg::Control(Command::Disconnect)).await?;

        handle.stop().await;
        assert_eq!(service.weights(), vec![array![[2.0, 3.0]]]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_failure_is_an_error() -> io::Result<()> {
        let taken = TcpListener::bind("127.0.0.1:0").await?;
        let addr = taken.local_addr()?;

        let res = MergeServer::start(service(), addr, NonZeroUsize::MIN).await;
        assert!(res.is_err());
        Ok(())
    }
}
