//! An in-memory [`Stack`] for running both ends of a connection inside one
//! process. Datagrams travel through a [`Network`] and the application side
//! is driven through an [`AppHandle`].

use super::{Event, EventMask, Stack, StackError};
use crate::networks::{Datagram, Network};
use async_trait::async_trait;
use std::{collections::VecDeque, future, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};

/// The number of datagrams that may queue up at a stack
const DATAGRAM_QUEUE: usize = 16;
/// The number of writes that may queue up before [`AppHandle::write`] waits
const REQUEST_QUEUE: usize = 8;

enum AppRequest {
    Write(Vec<u8>),
    Close,
}

/// Something a stack tells its application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The connection finished opening
    Connected,
    /// Bytes from the peer
    Data(Vec<u8>),
    /// The peer will send nothing more
    PeerFin,
}

/// The application's end of a [`SimStack`]
#[derive(Debug)]
pub struct AppHandle {
    requests: Sender<AppRequest>,
    events: UnboundedReceiver<AppEvent>,
}

impl AppHandle {
    /// Queues bytes for the connection to send
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> Result<(), StackError> {
        self.requests
            .send(AppRequest::Write(bytes.into()))
            .await
            .map_err(|_| StackError::Disconnected)
    }

    /// Asks the connection to close once every queued byte has been sent.
    /// Dropping the handle does the same.
    pub async fn close(&self) -> Result<(), StackError> {
        self.requests
            .send(AppRequest::Close)
            .await
            .map_err(|_| StackError::Disconnected)
    }

    /// The next thing the stack reported, or `None` once the stack is gone
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.events.recv().await
    }

    /// Waits for the connection to open
    pub async fn connected(&mut self) -> Result<(), StackError> {
        match self.next_event().await {
            Some(AppEvent::Connected) => Ok(()),
            _ => Err(StackError::Disconnected),
        }
    }

    /// Collects delivered bytes until the peer finishes or the stack goes
    /// away
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = vec![];
        while let Some(event) = self.next_event().await {
            match event {
                AppEvent::Data(bytes) => out.extend_from_slice(&bytes),
                AppEvent::PeerFin => break,
                AppEvent::Connected => {}
            }
        }
        out
    }
}

/// A [`Stack`] backed by channels
pub struct SimStack {
    network: Arc<dyn Network>,
    outgoing: Sender<Datagram>,
    incoming: Receiver<Datagram>,
    /// A datagram taken off `incoming` while waiting for events
    datagram: Option<Datagram>,
    network_closed: bool,
    requests: Receiver<AppRequest>,
    events: UnboundedSender<AppEvent>,
    /// Bytes written by the application and not yet read by the connection
    app_buffer: VecDeque<u8>,
    close_requested: bool,
    idle_timeout: Option<Duration>,
}

impl SimStack {
    /// Creates a stack that sends through `network` to `outgoing` and
    /// receives on `incoming`
    pub fn new(
        network: Arc<dyn Network>,
        outgoing: Sender<Datagram>,
        incoming: Receiver<Datagram>,
    ) -> (Self, AppHandle) {
        let (request_send, request_recv) = mpsc::channel(REQUEST_QUEUE);
        let (event_send, event_recv) = mpsc::unbounded_channel();
        let stack = Self {
            network,
            outgoing,
            incoming,
            datagram: None,
            network_closed: false,
            requests: request_recv,
            events: event_send,
            app_buffer: VecDeque::new(),
            close_requested: false,
            idle_timeout: None,
        };
        let app = AppHandle {
            requests: request_send,
            events: event_recv,
        };
        (stack, app)
    }

    /// Creates two stacks wired to each other through `network`
    pub fn pair(network: Arc<dyn Network>) -> ((Self, AppHandle), (Self, AppHandle)) {
        let (a_send, a_recv) = mpsc::channel(DATAGRAM_QUEUE);
        let (b_send, b_recv) = mpsc::channel(DATAGRAM_QUEUE);
        (
            Self::new(network.clone(), b_send, a_recv),
            Self::new(network, a_send, b_recv),
        )
    }

    /// Report [`Event::Timeout`] from a wait that sees nothing for `timeout`.
    /// Without one a wait can last forever.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    fn ready(&self, mask: EventMask) -> Option<Event> {
        if mask.contains(EventMask::NETWORK_DATA) && self.datagram.is_some() {
            Some(Event::NetworkData)
        } else if mask.contains(EventMask::APP_DATA) && !self.app_buffer.is_empty() {
            Some(Event::AppData)
        } else if mask.contains(EventMask::APP_CLOSE_REQUESTED)
            && self.close_requested
            && self.app_buffer.is_empty()
        {
            Some(Event::AppCloseRequested)
        } else {
            None
        }
    }
}

#[async_trait]
impl Stack for SimStack {
    async fn wait_for_event(&mut self, mask: EventMask) -> Result<Event, StackError> {
        loop {
            if let Some(event) = self.ready(mask) {
                return Ok(event);
            }
            let wants_network = mask.contains(EventMask::NETWORK_DATA) && !self.network_closed;
            let wants_app = mask.wants_app() && !self.close_requested;
            if !wants_network && !wants_app {
                Err(StackError::Disconnected)?
            }

            let idle = self.idle_timeout;
            tokio::select! {
                biased;
                datagram = self.incoming.recv(), if wants_network => match datagram {
                    Some(datagram) => self.datagram = Some(datagram),
                    None => self.network_closed = true,
                },
                request = self.requests.recv(), if wants_app => match request {
                    Some(AppRequest::Write(bytes)) => self.app_buffer.extend(bytes),
                    Some(AppRequest::Close) | None => self.close_requested = true,
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
        self.network
            .clone()
            .send(datagram.to_vec(), &self.outgoing)
            .await?;
        Ok(datagram.len())
    }

    async fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
        let datagram = match self.datagram.take() {
            Some(datagram) => datagram,
            None => self
                .incoming
                .recv()
                .await
                .ok_or(StackError::Disconnected)?,
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }

    async fn app_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
        let len = self.app_buffer.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.app_buffer.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }

    async fn app_send(&mut self, bytes: &[u8]) -> Result<(), StackError> {
        self.events
            .send(AppEvent::Data(bytes.to_vec()))
            .map_err(|_| StackError::ApplicationGone)
    }

    async fn fin_received(&mut self) -> Result<(), StackError> {
        self.events
            .send(AppEvent::PeerFin)
            .map_err(|_| StackError::ApplicationGone)
    }

    async fn unblock_application(&mut self) -> Result<(), StackError> {
        self.events
            .send(AppEvent::Connected)
            .map_err(|_| StackError::ApplicationGone)
    }
}
