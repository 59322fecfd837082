//! In-process router used by the session tests.

use bytes::BytesMut;
use nkips_protocol::message::WELCOME;
use nkips_protocol::{Command, CommandDecoder, CrosspointChange, Outbound, TableDump};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct MockRouter {
    listener: TcpListener,
}

impl MockRouter {
    pub(crate) async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub(crate) async fn accept(&self) -> MockConnection {
        let (stream, _) = tokio::time::timeout(IO_TIMEOUT, self.listener.accept())
            .await
            .expect("no connection")
            .unwrap();
        MockConnection {
            stream,
            decoder: CommandDecoder::new(),
        }
    }

    /// Accepts within `timeout`, or returns `None`.
    pub(crate) async fn try_accept(&self, timeout: Duration) -> Option<MockConnection> {
        let (stream, _) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .ok()?
            .ok()?;
        Some(MockConnection {
            stream,
            decoder: CommandDecoder::new(),
        })
    }
}

pub(crate) struct MockConnection {
    stream: TcpStream,
    decoder: CommandDecoder,
}

impl MockConnection {
    /// Reads the next banner or command sent by the client.
    pub(crate) async fn next(&mut self) -> Outbound {
        let mut buf = BytesMut::with_capacity(256);
        loop {
            if let Some(item) = self.decoder.decode_next().unwrap() {
                return item;
            }
            let n = tokio::time::timeout(IO_TIMEOUT, self.stream.read_buf(&mut buf))
                .await
                .expect("client went quiet")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            self.decoder.extend(&buf.split());
        }
    }

    /// Reads the next command, skipping keepalives.
    pub(crate) async fn next_command(&mut self) -> Command {
        loop {
            match self.next().await {
                Outbound::Command(command) => return command,
                Outbound::Keepalive => continue,
                Outbound::Identification => panic!("identification sent twice"),
            }
        }
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Plays the gateway side of a connection up to the table dump.
    pub(crate) async fn handshake(&mut self, table: &TableDump) {
        assert_eq!(self.next().await, Outbound::Identification);
        self.send(WELCOME).await;
        assert!(matches!(
            self.next_command().await,
            Command::Handshake { address: 254 }
        ));
        self.send(&table.encode(254)).await;
    }

    /// Echoes the next crosspoint command back as a change.
    pub(crate) async fn echo_next(&mut self) -> CrosspointChange {
        match self.next_command().await {
            Command::SetCrosspoint { address, request } => {
                let change = CrosspointChange::from(request);
                self.send(&change.encode(address).unwrap()).await;
                change
            }
            other => panic!("expected a crosspoint command, got {other:?}"),
        }
    }
}
