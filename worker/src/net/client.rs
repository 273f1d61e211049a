use std::time::Duration;

use comms::{
    MergeMessage, OnoReceiver, OnoSender, PROTOCOL_VERSION,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{Result, WorkerErr};

/// Merge service client.
///
/// Contract:
/// - open with a `Connect` handshake, answered with the server's `Connect`
/// - send `Msg::Data(Payload::MergeRequest)`, receive `Msg::Data(Payload::MergeResponse)`
/// - close with `Disconnect`
pub struct MergeClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    buf: Vec<u32>,
    round: u64,
}

impl MergeClient<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to a merge service, retrying while the service is not up yet.
    ///
    /// Only establishing the connection is retried, merges never are.
    ///
    /// # Arguments
    /// * `addr` - The address of the merge service.
    /// * `attempts` - The maximum amount of connection attempts, at least one is made.
    /// * `interval` - The time to wait between attempts.
    ///
    /// # Returns
    /// A client that already went through the handshake.
    pub async fn connect(addr: &str, attempts: usize, interval: Duration) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < attempts => {
                    warn!("connection attempt {attempt}/{attempts} to {addr} failed: {e}");
                    attempt += 1;
                    time::sleep(interval).await;
                }
                Err(source) => {
                    return Err(WorkerErr::Connect {
                        addr: addr.to_string(),
                        attempts,
                        source,
                    });
                }
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        let client = Self::handshake(rx, tx).await?;
        info!("connected to merge service at {addr}");
        Ok(client)
    }
}

impl<R, W> MergeClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Runs the protocol handshake over an already open channel.
    pub async fn handshake(mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<Self> {
        let mut buf: Vec<u32> = Vec::new();

        tx.send(&Msg::Control(Command::Connect {
            version: PROTOCOL_VERSION,
        }))
        .await?;

        match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Connect { version }) => {
                debug!("handshake done, server speaks version {version}")
            }
            Msg::Err(detail) => return Err(WorkerErr::Rejected(detail.into_owned())),
            other => {
                return Err(WorkerErr::UnexpectedMessage {
                    round: 0,
                    got: other.kind(),
                });
            }
        }

        Ok(Self {
            rx,
            tx,
            buf,
            round: 0,
        })
    }

    /// Sends an update to the merge service and waits for the canonical state.
    ///
    /// # Arguments
    /// * `request` - The averaged update of this worker.
    ///
    /// # Returns
    /// The service's response, or an error if the service rejected the update or the connection
    /// failed.
    pub async fn merge(&mut self, request: MergeMessage) -> Result<MergeMessage> {
        self.round += 1;
        self.tx
            .send(&Msg::Data(Payload::MergeRequest(request)))
            .await?;

        match self.rx.recv_into(&mut self.buf).await? {
            Msg::Data(Payload::MergeResponse(response)) => Ok(response),
            Msg::Err(detail) => Err(WorkerErr::Rejected(detail.into_owned())),
            other => Err(WorkerErr::UnexpectedMessage {
                round: self.round,
                got: other.kind(),
            }),
        }
    }

    /// The amount of merges sent so far.
    pub fn rounds(&self) -> u64 {
        self.round
    }

    /// Tells the service this worker is done and closes the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await?;
        self.tx.shutdown().await?;
        debug!("disconnected after {} merges", self.round);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use ndarray::array;
    use tokio::io;

    use super::*;

    #[tokio::test]
    async fn handshake_and_merge_roundtrip() -> io::Result<()> {
        let (sv_stream, wk_stream) = io::duplex(4096);
        let (sv_rx, sv_tx) = io::split(sv_stream);
        let (mut sv_rx, mut sv_tx) = comms::channel(sv_rx, sv_tx);
        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);

        let server = async {
            let mut buf: Vec<u32> = Vec::new();
            assert!(matches!(
                sv_rx.recv_into(&mut buf).await?,
                Msg::Control(Command::Connect {
                    version: PROTOCOL_VERSION
                })
            ));
            sv_tx
                .send(&Msg::Control(Command::Connect {
                    version: PROTOCOL_VERSION,
                }))
                .await?;

            let Msg::Data(Payload::MergeRequest(request)) = sv_rx.recv_into(&mut buf).await? else {
                panic!("expected a merge request");
            };
            let response =
                MergeMessage::response(true, request.matrices, request.previous_deltas);
            sv_tx
                .send(&Msg::Data(Payload::MergeResponse(response)))
                .await?;

            assert!(matches!(
                sv_rx.recv_into(&mut buf).await?,
                Msg::Control(Command::Disconnect)
            ));
            io::Result::Ok(())
        };

        let client = async {
            let mut client = MergeClient::handshake(wk_rx, wk_tx).await?;
            let request = MergeMessage::request(0.5, vec![array![[1.0]]], vec![array![[0.0]]]);
            let response = client.merge(request).await?;

            assert!(response.converged);
            assert_eq!(response.matrices, vec![array![[1.0]]]);
            assert_eq!(client.rounds(), 1);
            client.disconnect().await
        };

        let (server, client) = tokio::join!(server, client);
        server?;
        client?;
        Ok(())
    }

    #[tokio::test]
    async fn error_reply_is_a_rejection() -> io::Result<()> {
        let (sv_stream, wk_stream) = io::duplex(4096);
        let (_, sv_tx) = io::split(sv_stream);
        let (_, mut sv_tx) = comms::channel(io::empty(), sv_tx);
        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);

        sv_tx
            .send(&Msg::Err(Cow::Borrowed("protocol version mismatch")))
            .await?;

        let res = MergeClient::handshake(wk_rx, wk_tx).await;
        assert!(matches!(res, Err(WorkerErr::Rejected(_))));
        Ok(())
    }

    #[tokio::test]
    async fn connect_gives_up_after_the_last_attempt() -> io::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        drop(listener);

        let res = MergeClient::connect(&addr, 2, Duration::from_millis(10)).await;
        assert!(matches!(res, Err(WorkerErr::Connect { attempts: 2, .. })));
        Ok(())
    }
}
