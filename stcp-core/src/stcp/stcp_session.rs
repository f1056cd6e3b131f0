use super::{
    connection::{Action, Connection, ConnectionError, Role, Trigger},
    segment::{Segment, SegmentKind},
    stcp_parsing::{ParseError, HEADER_OCTETS},
    window::MSS,
};
use crate::{
    logging::segment_event,
    stack::{Event, EventMask, Stack, StackError},
    transfer_log::{TransferLog, TransferLogError},
    Config,
};
use thiserror::Error as ThisError;

/// Large enough for a full data segment
const RECV_BUFFER: usize = HEADER_OCTETS + MSS as usize;

/// The event loop for one end of a connection. Owns the connection context
/// and drives it with events from a [`Stack`] until the close handshake
/// completes or something goes wrong.
pub struct StcpSession<S> {
    stack: S,
    connection: Connection,
}

impl<S: Stack> StcpSession<S> {
    /// Creates a session for one end of a connection, opening the transfer
    /// log named in `config` if there is one
    pub fn new(stack: S, role: Role, config: &Config) -> Result<Self, SessionError> {
        let mut connection = Connection::new(config, role);
        if let Some(path) = &config.transfer_log {
            connection = connection.with_transfer_log(TransferLog::create(path)?);
        }
        Ok(Self { stack, connection })
    }

    /// Writes the transfer log to `log` instead
    pub fn transfer_log(mut self, log: TransferLog) -> Self {
        self.connection = self.connection.with_transfer_log(log);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Opens the connection, moves data in both directions until it closes,
    /// and returns. Any error aborts the connection without telling the peer.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.event_loop().await;
        if let Err(e) = &result {
            tracing::error!(
                role = ?self.connection.role(),
                state = %self.connection.state(),
                fatal = e.is_fatal(),
                "Aborting connection: {e}"
            );
        }
        result
    }

    async fn event_loop(&mut self) -> Result<(), SessionError> {
        let role = self.connection.role();
        self.drive(Trigger::Open(role), vec![]).await?;
        while !self.connection.is_done() {
            match self.stack.wait_for_event(EventMask::ANY).await? {
                Event::AppData => self.write().await?,
                Event::NetworkData => self.segment_arrives().await?,
                Event::AppCloseRequested => self.drive(Trigger::Close, vec![]).await?,
                event @ Event::Timeout => Err(SessionError::UnexpectedEvent(event))?,
            }
        }
        Ok(())
    }

    /// Sends as much application data as the window allows
    async fn write(&mut self) -> Result<(), SessionError> {
        let mut buf = vec![0; self.connection.budget()];
        let len = self.stack.app_recv(&mut buf).await?;
        if len == 0 {
            Err(SessionError::EmptyWrite)?
        }
        buf.truncate(len);
        self.drive(Trigger::Write, buf).await
    }

    /// Handles a segment that arrived while nothing was awaited
    async fn segment_arrives(&mut self) -> Result<(), SessionError> {
        let segment = self.receive().await?;
        let kind = if segment.header.ctl.fin() {
            SegmentKind::Fin
        } else if segment.payload.is_empty() {
            tracing::warn!(
                role = ?self.connection.role(),
                kind = ?segment.kind(),
                seq = segment.header.seq,
                "Dropping segment without data"
            );
            return Ok(());
        } else {
            SegmentKind::Data
        };
        self.connection.record(&segment)?;
        self.drive(Trigger::Arrived(kind), segment.payload).await
    }

    /// Applies `trigger` and performs the actions it produces, feeding awaited
    /// segments and follow-up closes back in until nothing is left to do.
    /// `payload` is the data to send for a write or the data carried by the
    /// segment that arrived last.
    async fn drive(&mut self, trigger: Trigger, mut payload: Vec<u8>) -> Result<(), SessionError> {
        let mut next = Some(trigger);
        while let Some(trigger) = next.take() {
            for &action in self.connection.apply(trigger)? {
                match action {
                    Action::Send(kind) => {
                        let bytes = match kind {
                            SegmentKind::Data => std::mem::take(&mut payload),
                            _ => vec![],
                        };
                        self.send(kind, &bytes).await?;
                    }
                    Action::Await(kind) => {
                        payload = self.await_segment(kind).await?.payload;
                        next = Some(Trigger::Arrived(kind));
                    }
                    Action::Deliver if payload.is_empty() => {}
                    Action::Deliver => self.stack.app_send(&payload).await?,
                    Action::SignalPeerFin => self.stack.fin_received().await?,
                    Action::Unblock => self.stack.unblock_application().await?,
                    Action::Close => next = Some(Trigger::Close),
                }
            }
        }
        self.connection.finish();
        Ok(())
    }

    async fn send(&mut self, kind: SegmentKind, payload: &[u8]) -> Result<(), SessionError> {
        let segment = self.connection.segment(kind, payload)?;
        let written = self.stack.network_send(&segment.serialize()).await?;
        if written == 0 {
            Err(SessionError::NonPositiveSend)?
        }
        segment_event("Send", self.connection.role(), &segment);
        Ok(())
    }

    async fn await_segment(&mut self, expected: SegmentKind) -> Result<Segment, SessionError> {
        match self.stack.wait_for_event(EventMask::NETWORK_DATA).await? {
            Event::NetworkData => {}
            event => Err(SessionError::UnexpectedEvent(event))?,
        }
        let segment = self.receive().await?;
        self.connection.accept(expected, &segment)?;
        Ok(segment)
    }

    async fn receive(&mut self) -> Result<Segment, SessionError> {
        let mut buf = [0; RECV_BUFFER];
        let len = self.stack.network_recv(&mut buf).await?;
        let segment = Segment::parse(&buf[..len])?;
        segment_event("Recv", self.connection.role(), &segment);
        Ok(segment)
    }
}

/// An error that ended a session
#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("{0}")]
    Connection(#[from] ConnectionError),
    #[error("Malformed segment: {0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Stack(#[from] StackError),
    #[error("{0}")]
    TransferLog(#[from] TransferLogError),
    #[error("The network accepted none of the segment")]
    NonPositiveSend,
    #[error("The application reported data but none could be read")]
    EmptyWrite,
    #[error("Unexpected {0:?} event")]
    UnexpectedEvent(Event),
}

impl SessionError {
    /// Whether the error points at a broken contract between the session and
    /// its caller or stack, rather than at the peer or the network
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Connection(e) => e.is_contract_violation(),
            SessionError::UnexpectedEvent(_) | SessionError::EmptyWrite => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        networks::Reliable,
        stack::{AppHandle, SimStack},
        stcp::{stcp_parsing::StcpHeaderBuilder, State},
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use tracing_test::traced_test;

    /// A stack whose network or application side reports moving no bytes
    struct Stalling {
        inner: SimStack,
        stall_network: bool,
        stall_app: bool,
    }

    #[async_trait]
    impl Stack for Stalling {
        async fn wait_for_event(&mut self, mask: EventMask) -> Result<Event, StackError> {
            self.inner.wait_for_event(mask).await
        }

        async fn network_send(&mut self, datagram: &[u8]) -> Result<usize, StackError> {
            match self.stall_network {
                true => Ok(0),
                false => self.inner.network_send(datagram).await,
            }
        }

        async fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
            self.inner.network_recv(buf).await
        }

        async fn app_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError> {
            match self.stall_app {
                true => Ok(0),
                false => self.inner.app_recv(buf).await,
            }
        }

        async fn app_send(&mut self, bytes: &[u8]) -> Result<(), StackError> {
            self.inner.app_send(bytes).await
        }

        async fn fin_received(&mut self) -> Result<(), StackError> {
            self.inner.fin_received().await
        }

        async fn unblock_application(&mut self) -> Result<(), StackError> {
            self.inner.unblock_application().await
        }
    }

    async fn next_segment(stack: &mut SimStack) -> Segment {
        assert_eq!(
            stack.wait_for_event(EventMask::NETWORK_DATA).await.unwrap(),
            Event::NetworkData
        );
        let mut buf = [0; RECV_BUFFER];
        let len = stack.network_recv(&mut buf).await.unwrap();
        Segment::parse(&buf[..len]).unwrap()
    }

    /// A FIN that also carries `payload`
    fn fin_with_data(seq: u32, ack: u32, payload: &[u8]) -> Segment {
        let header = StcpHeaderBuilder::new(0, 0, seq)
            .ack_number(ack)
            .wnd(3072)
            .fin()
            .build(payload.len())
            .unwrap();
        Segment {
            header,
            payload: payload.to_vec(),
        }
    }

    fn ack(seq: u32, ack: u32) -> Segment {
        Segment {
            header: StcpHeaderBuilder::new(0, 0, seq).ack(ack).build(0).unwrap(),
            payload: vec![],
        }
    }

    fn sessions() -> (
        (StcpSession<SimStack>, AppHandle),
        (StcpSession<SimStack>, AppHandle),
    ) {
        let ((client, client_app), (server, server_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let config = Config::default();
        (
            (
                StcpSession::new(client, Role::Active, &config).unwrap(),
                client_app,
            ),
            (
                StcpSession::new(server, Role::Passive, &config).unwrap(),
                server_app,
            ),
        )
    }

    #[tokio::test]
    async fn transfers_and_closes() {
        let ((mut client, client_app), (mut server, mut server_app)) = sessions();
        client_app.write(b"Hello, world!".to_vec()).await.unwrap();
        client_app.close().await.unwrap();

        let (client_result, server_result) = tokio::join!(client.run(), server.run());
        client_result.unwrap();
        server_result.unwrap();

        assert!(client.connection().is_done());
        assert!(server.connection().is_done());
        assert_eq!(client.connection().state(), State::Closed);
        server_app.connected().await.unwrap();
        assert_eq!(server_app.read_to_end().await, b"Hello, world!");
    }

    #[tokio::test]
    #[traced_test]
    async fn traces_segments_and_states() {
        let ((mut client, client_app), (mut server, _server_app)) = sessions();
        client_app.close().await.unwrap();
        let (client_result, server_result) = tokio::join!(client.run(), server.run());
        client_result.unwrap();
        server_result.unwrap();

        assert!(logs_contain("State change"));
        assert!(logs_contain("ESTABLISHED"));
        assert!(logs_contain("FIN-WAIT-2"));
        assert!(logs_contain("LAST-ACK"));
        assert!(logs_contain("Connection closed"));
    }

    #[tokio::test]
    async fn garbage_aborts_the_handshake() {
        let ((mut peer, _peer_app), (server_stack, _server_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let mut server =
            StcpSession::new(server_stack, Role::Passive, &Config::default()).unwrap();
        peer.network_send(b"not a segment").await.unwrap();

        let err = server.run().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Parse(ParseError::HeaderTooShort)
        ));
        assert!(!err.is_fatal());
        assert_eq!(server.connection().state(), State::Listen);
    }

    #[tokio::test]
    async fn wrong_segment_aborts_the_handshake() {
        let ((mut peer, _peer_app), (client_stack, _client_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let mut client =
            StcpSession::new(client_stack, Role::Active, &Config::default()).unwrap();
        // A FIN where a SYN,ACK belongs
        let fin = {
            let mut stray = Connection::new(&Config::default(), Role::Passive);
            stray.segment(SegmentKind::Fin, &[]).unwrap()
        };
        peer.network_send(&fin.serialize()).await.unwrap();

        let err = client.run().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Connection(ConnectionError::UnexpectedSegment {
                expected: SegmentKind::SynAck,
                actual: SegmentKind::Fin,
            })
        ));
        assert_eq!(client.connection().state(), State::SynSent);
    }

    #[tokio::test]
    async fn runs_only_once() {
        let ((mut client, client_app), (mut server, _server_app)) = sessions();
        client_app.close().await.unwrap();
        let (client_result, server_result) = tokio::join!(client.run(), server.run());
        client_result.unwrap();
        server_result.unwrap();

        let err = client.run().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Connection(ConnectionError::Closed)
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn data_on_a_peer_fin_is_delivered() {
        let ((mut peer, _peer_app), (server_stack, mut server_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let mut server =
            StcpSession::new(server_stack, Role::Passive, &Config::default()).unwrap();

        let script = async move {
            let mut client = Connection::new(&Config::default(), Role::Active);
            client.apply(Trigger::Open(Role::Active)).unwrap();
            let syn = client.segment(SegmentKind::Syn, &[]).unwrap();
            peer.network_send(&syn.serialize()).await.unwrap();
            let syn_ack = next_segment(&mut peer).await;
            client.accept(SegmentKind::SynAck, &syn_ack).unwrap();
            client.apply(Trigger::Arrived(SegmentKind::SynAck)).unwrap();
            let handshake_ack = client.segment(SegmentKind::Ack, &[]).unwrap();
            peer.network_send(&handshake_ack.serialize()).await.unwrap();

            let fin = fin_with_data(2, 2, b"hello");
            peer.network_send(&fin.serialize()).await.unwrap();
            let fin_ack = next_segment(&mut peer).await;
            assert_eq!(fin_ack.kind(), SegmentKind::Ack);
            assert_eq!(fin_ack.header.ack, 8);

            let server_fin = next_segment(&mut peer).await;
            assert_eq!(server_fin.kind(), SegmentKind::Fin);
            let last = ack(8, server_fin.header.seq + 1);
            peer.network_send(&last.serialize()).await.unwrap();
        };
        let (result, ()) = tokio::join!(server.run(), script);
        result.unwrap();

        assert_eq!(server.connection().state(), State::Closed);
        assert_eq!(server_app.read_to_end().await, b"hello");
    }

    #[tokio::test]
    async fn data_on_the_closing_fin_is_delivered() {
        let ((mut peer, _peer_app), (client_stack, mut client_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let mut client =
            StcpSession::new(client_stack, Role::Active, &Config::default()).unwrap();
        client_app.close().await.unwrap();

        let script = async move {
            let mut server = Connection::new(&Config::default(), Role::Passive);
            server.apply(Trigger::Open(Role::Passive)).unwrap();
            let syn = next_segment(&mut peer).await;
            server.accept(SegmentKind::Syn, &syn).unwrap();
            server.apply(Trigger::Arrived(SegmentKind::Syn)).unwrap();
            let syn_ack = server.segment(SegmentKind::SynAck, &[]).unwrap();
            peer.network_send(&syn_ack.serialize()).await.unwrap();

            let handshake_ack = next_segment(&mut peer).await;
            assert_eq!(handshake_ack.kind(), SegmentKind::Ack);
            let fin = next_segment(&mut peer).await;
            assert_eq!(fin.kind(), SegmentKind::Fin);
            assert_eq!(fin.header.seq, 2);
            peer.network_send(&ack(2, 3).serialize()).await.unwrap();

            peer.network_send(&fin_with_data(2, 3, b"bye").serialize())
                .await
                .unwrap();
            let last = next_segment(&mut peer).await;
            assert_eq!(last.kind(), SegmentKind::Ack);
            assert_eq!(last.header.seq, 3);
            assert_eq!(last.header.ack, 6);
        };
        let (result, ()) = tokio::join!(client.run(), script);
        result.unwrap();
        assert!(client.connection().is_done());

        drop(client);
        assert_eq!(client_app.read_to_end().await, b"bye");
    }

    #[tokio::test]
    async fn zero_byte_send_aborts() {
        let ((client_stack, _client_app), (_server_stack, _server_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let stack = Stalling {
            inner: client_stack,
            stall_network: true,
            stall_app: false,
        };
        let mut client = StcpSession::new(stack, Role::Active, &Config::default()).unwrap();

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, SessionError::NonPositiveSend));
        assert!(!err.is_fatal());
        assert_eq!(client.connection().state(), State::SynSent);
        assert!(!client.connection().is_done());
    }

    #[tokio::test]
    async fn empty_application_read_aborts() {
        let ((client_stack, client_app), (server_stack, _server_app)) =
            SimStack::pair(Arc::new(Reliable::new()));
        let stack = Stalling {
            inner: client_stack,
            stall_network: false,
            stall_app: true,
        };
        let mut client = StcpSession::new(stack, Role::Active, &Config::default()).unwrap();
        let mut server =
            StcpSession::new(server_stack, Role::Passive, &Config::default()).unwrap();
        client_app.write(b"unread".to_vec()).await.unwrap();

        let err = tokio::select! {
            result = client.run() => result.unwrap_err(),
            result = server.run() => panic!("server finished first: {result:?}"),
        };
        assert!(matches!(err, SessionError::EmptyWrite));
        assert!(err.is_fatal());
        assert_eq!(client.connection().state(), State::Established);
        assert_eq!(client.connection().in_flight(), None);
    }
}
