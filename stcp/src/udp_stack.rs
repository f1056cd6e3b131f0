//! A [`Stack`] that carries segments in UDP datagrams and connects the
//! application side to standard input and output.

use async_trait::async_trait;
use stcp_core::{
    stack::{Event, EventMask, StackError},
    Stack,
};
use std::{future, net::SocketAddr, time::Duration};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt, Stdin, Stdout},
    net::UdpSocket,
};

/// Larger than any segment, so nothing a peer sends is truncated by the read
const DATAGRAM_BUFFER: usize = 2048;
const INPUT_BUFFER: usize = 4096;

pub struct UdpStack {
    socket: UdpSocket,
    /// Where segments go. A listening stack takes the address of the first
    /// datagram it receives.
    peer: Option<SocketAddr>,
    datagram: Option<Vec<u8>>,
    /// Read for bytes to send. A stack without input never sends data.
    input: Option<Stdin>,
    output: Stdout,
    app_buffer: Vec<u8>,
    input_closed: bool,
    idle_timeout: Option<Duration>,
}

impl UdpStack {
    /// Binds `bind` and waits for a peer. Received bytes go to standard
    /// output.
    pub async fn listen(bind: SocketAddr) -> Result<Self, StackError> {
        Ok(Self::new(UdpSocket::bind(bind).await?, None, None))
    }

    /// Binds `bind` and sends standard input to `peer`, closing at the end of
    /// input.
    pub async fn connect(bind: SocketAddr, peer: SocketAddr) -> Result<Self, StackError> {
        Ok(Self::new(
            UdpSocket::bind(bind).await?,
            Some(peer),
            Some(io::stdin()),
        ))
    }

    fn new(socket: UdpSocket, peer: Option<SocketAddr>, input: Option<Stdin>) -> Self {
        Self {
            socket,
            peer,
            datagram: None,
            input,
            output: io::stdout(),
            app_buffer: vec![],
            input_closed: false,
            idle_timeout: None,
        }
    }

    /// Report [`Event::Timeout`] from a wait that sees nothing for `timeout`
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StackError> {
        Ok(self.socket.local_addr()?)
    }

    fn ready(&self, mask: EventMask) -> Option<Event> {
        if mask.contains(EventMask::NETWORK_DATA) && self.datagram.is_some() {
            Some(Event::NetworkData)
        } else if mask.contains(EventMask::APP_DATA) && !self.app_buffer.is_empty() {
            Some(Event::AppData)
        } else if mask.contains(EventMask::APP_CLOSE_REQUESTED)
            && self.input_closed
            && self.app_buffer.is_empty()
        {
            Some(Event::AppCloseRequested)
        } else {
            None
        }
    }

    /// Keeps a datagram if it came from the peer
    fn take_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        match self.peer {
            Some(peer) if peer != from => {
                tracing::warn!(%from, %peer, "Ignoring datagram from a stranger");
            }
            Some(_) => self.datagram = Some(datagram.to_vec()),
            None => {
                tracing::info!(%from, "Peer found");
                self.peer = Some(from);
                self.datagram = Some(datagram.to_vec());
            }
        }
    }
}

#[async_trait]
impl Stack for UdpStack {
    async fn wait_for_event(&mut self, mask: EventMask) -> Result<Event, StackError> {
        let mut datagram = [0; DATAGRAM_BUFFER];
        let mut input = [0; INPUT_BUFFER];
        loop {
            if let Some(event) = self.ready(mask) {
                return Ok(event);
            }
            let wants_network = mask.contains(EventMask::NETWORK_DATA);
            let wants_app = mask.wants_app() && !self.input_closed;

            let idle = self.idle_timeout;
            let stdin = self.input.as_mut();
            tokio::select! {
                biased;
                received = self.socket.recv_from(&mut datagram), if wants_network => {
                    let (len, from) = received?;
                    self.take_datagram(&datagram[..len], from);
                }
                read = async {
                    match stdin {
                        Some(stdin) => stdin.read(&mut input).await,
                        None => future::pending().await,
                    }
                }, if wants_app => match read? {
                    0 => self.input_closed = true,
                    len => self.app_buffer.extend_from_slice(&input[..len]),
                },
                _ = async {
                    match idle {
                        Some(timeout) => tokio::time::sleep(timeout).await,
                        None => future::pending().await,
                    }
                } => return Ok(Event::Timeout),
            }
        }
    }

    async fn network_send(&mut self, datagram: &[u8]) -> Result<usize, StackError> {
        let peer = self.peer.ok_or(StackError::Disconnected)?;
        Ok(self.socket.send_to(datagram, peer).await?)
    }

    async fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
        let datagram = loop {
            if let Some(datagram) = self.datagram.take() {
                break datagram;
            }
            let mut scratch = [0; DATAGRAM_BUFFER];
            let (len, from) = self.socket.recv_from(&mut scratch).await?;
            self.take_datagram(&scratch[..len], from);
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }

    async fn app_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
        let len = self.app_buffer.len().min(buf.len());
        buf[..len].copy_from_slice(&self.app_buffer[..len]);
        self.app_buffer.drain(..len);
        Ok(len)
    }

    async fn app_send(&mut self, bytes: &[u8]) -> Result<(), StackError> {
        self.output.write_all(bytes).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn fin_received(&mut self) -> Result<(), StackError> {
        self.output.flush().await?;
        tracing::info!("Peer finished sending");
        Ok(())
    }

    async fn unblock_application(&mut self) -> Result<(), StackError> {
        tracing::info!(peer = ?self.peer, "Connection open");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (UdpStack, UdpStack) {
        let listener = UdpStack::listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let connector = UdpStack::new(socket, Some(listen_addr), None);
        (listener, connector)
    }

    #[tokio::test]
    async fn listener_learns_its_peer() {
        let (mut listener, mut connector) = pair().await;
        connector.network_send(b"syn").await.unwrap();
        assert_eq!(
            listener
                .wait_for_event(EventMask::NETWORK_DATA)
                .await
                .unwrap(),
            Event::NetworkData
        );
        let mut buf = [0; 8];
        let len = listener.network_recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"syn");
        assert_eq!(listener.peer, Some(connector.local_addr().unwrap()));

        listener.network_send(b"syn-ack").await.unwrap();
        let len = connector.network_recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"syn-ack");
    }

    #[tokio::test]
    async fn listener_cannot_send_before_a_peer_appears() {
        let (mut listener, _connector) = pair().await;
        assert!(matches!(
            listener.network_send(b"hello").await,
            Err(StackError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn idle_wait_times_out() {
        let (listener, _connector) = pair().await;
        let mut listener = listener.idle_timeout(Some(Duration::from_millis(20)));
        assert_eq!(
            listener.wait_for_event(EventMask::ANY).await.unwrap(),
            Event::Timeout
        );
    }
}
