//! XEP-0114 component session.
//!
//! Connects to an XMPP server's component listener, authenticates with the
//! shared-secret handshake and then exchanges stanzas. Stream features, TLS
//! and SASL are not part of the component protocol and are not handled.

use sha1::{Digest, Sha1};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::config::ComponentConfig;
use crate::parser::{ns, Frame, StanzaFramer};
use crate::types::Stanza;
use crate::BridgeError;

/// `hex(sha1(stream_id + secret))`, the XEP-0114 handshake value.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reading side of a component session.
pub struct ComponentReader<R> {
    inner: R,
    framer: StanzaFramer,
}

impl<R: AsyncRead + Unpin> ComponentReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            framer: StanzaFramer::new(),
        }
    }

    /// Next frame off the wire; `None` once the peer closes the connection.
    async fn next_frame(&mut self) -> Result<Option<Frame>, BridgeError> {
        let mut buf = [0u8; 8192];

        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.framer.feed(&buf[..n]);
        }
    }

    /// Read the next presence or iq stanza.
    ///
    /// Returns `Ok(None)` when the stream ends. Messages are skipped, as are
    /// stanzas that fail to parse.
    #[instrument(skip(self), name = "perch.component.read_stanza")]
    pub async fn read_stanza(&mut self) -> Result<Option<Stanza>, BridgeError> {
        loop {
            match self.next_frame().await? {
                None | Some(Frame::StreamEnd) => {
                    debug!("Component stream closed by server");
                    return Ok(None);
                }
                Some(Frame::StreamHeader(_)) => {
                    debug!("Ignoring unexpected stream header");
                }
                Some(Frame::Element(element)) if element.is("error", ns::STREAM) => {
                    return Err(BridgeError::stream(stream_error_condition(&element)));
                }
                Some(Frame::Element(element)) => {
                    let name = element.name().to_string();
                    match Stanza::from_element(element) {
                        Ok(Some(stanza)) => return Ok(Some(stanza)),
                        Ok(None) => debug!(element = %name, "Ignoring unsupported stanza"),
                        Err(e) => warn!(element = %name, error = %e, "Dropping malformed stanza"),
                    }
                }
            }
        }
    }
}

/// Writing side of a component session.
pub struct ComponentWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ComponentWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write raw XML to the stream.
    pub async fn write_raw(&mut self, xml: &str) -> Result<(), BridgeError> {
        self.inner.write_all(xml.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a stanza to the stream.
    pub async fn write_stanza(&mut self, stanza: &Stanza) -> Result<(), BridgeError> {
        let xml = stanza.to_xml()?;
        self.write_raw(&xml).await
    }

    /// Close the stream gracefully.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.write_raw("</stream:stream>").await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// An authenticated component session over any byte stream.
pub struct ComponentStream<S> {
    reader: ComponentReader<ReadHalf<S>>,
    writer: ComponentWriter<WriteHalf<S>>,
    domain: String,
    stream_id: Option<String>,
}

impl ComponentStream<TcpStream> {
    /// Connect to the component listener and authenticate.
    #[instrument(skip(config), name = "perch.component.connect", fields(addr = %config.address(), domain = %config.domain))]
    pub async fn connect(config: &ComponentConfig) -> Result<Self, BridgeError> {
        let tcp = TcpStream::connect(config.address()).await?;
        let mut stream = Self::new(tcp, config.domain.clone());
        stream.handshake(&config.secret).await?;
        Ok(stream)
    }
}

impl<S: AsyncRead + AsyncWrite> ComponentStream<S> {
    /// Wrap a connected byte stream. No bytes are exchanged until
    /// [`handshake`](Self::handshake).
    pub fn new(inner: S, domain: impl Into<String>) -> Self {
        let (read, write) = split(inner);
        Self {
            reader: ComponentReader::new(read),
            writer: ComponentWriter::new(write),
            domain: domain.into(),
            stream_id: None,
        }
    }

    /// Component domain this session answers as.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Stream id assigned by the server, once the header has been read.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Open the stream and authenticate with `secret`.
    #[instrument(skip(self, secret), name = "perch.component.handshake", fields(domain = %self.domain))]
    pub async fn handshake(&mut self, secret: &str) -> Result<(), BridgeError> {
        let header = format!(
            "<?xml version='1.0'?>\
            <stream:stream xmlns='{}' \
            xmlns:stream='{}' \
            to='{}'>",
            ns::COMPONENT_ACCEPT,
            ns::STREAM,
            self.domain
        );
        self.writer.write_raw(&header).await?;

        let stream_id = loop {
            match self.reader.next_frame().await? {
                Some(Frame::StreamHeader(h)) => {
                    break h
                        .id
                        .ok_or_else(|| BridgeError::handshake_failed("server sent no stream id"))?;
                }
                Some(Frame::Element(e)) if e.is("error", ns::STREAM) => {
                    return Err(BridgeError::handshake_failed(stream_error_condition(&e)));
                }
                Some(_) => continue,
                None => return Err(BridgeError::stream("Connection closed during header")),
            }
        };
        debug!(stream_id = %stream_id, "Received stream header");

        let digest = handshake_digest(&stream_id, secret);
        self.writer
            .write_raw(&format!("<handshake>{}</handshake>", digest))
            .await?;

        loop {
            match self.reader.next_frame().await? {
                Some(Frame::Element(e)) if e.name() == "handshake" => break,
                Some(Frame::Element(e)) if e.is("error", ns::STREAM) => {
                    return Err(BridgeError::handshake_failed(stream_error_condition(&e)));
                }
                Some(Frame::StreamEnd) | None => {
                    return Err(BridgeError::handshake_failed("stream closed during handshake"));
                }
                Some(other) => debug!(frame = ?other, "Ignoring frame before handshake reply"),
            }
        }

        info!(stream_id = %stream_id, "Component authenticated");
        self.stream_id = Some(stream_id);
        Ok(())
    }

    /// Read the next presence or iq stanza.
    pub async fn read_stanza(&mut self) -> Result<Option<Stanza>, BridgeError> {
        self.reader.read_stanza().await
    }

    /// Write a stanza to the stream.
    pub async fn write_stanza(&mut self, stanza: &Stanza) -> Result<(), BridgeError> {
        self.writer.write_stanza(stanza).await
    }

    /// Split into halves that can be driven from separate tasks.
    pub fn into_split(self) -> (ComponentReader<ReadHalf<S>>, ComponentWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

/// Defined condition named by a `<stream:error/>`.
fn stream_error_condition(error: &minidom::Element) -> String {
    error
        .children()
        .find(|c| c.name() != "text")
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:component:accept' xmlns:stream='http://etherx.jabber.org/streams' from='ps.example.com' id='ab'>";

    async fn read_until(server: &mut tokio::io::DuplexStream, needle: &str) -> String {
        let mut received = String::new();
        let mut buf = [0u8; 1024];
        while !received.contains(needle) {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed early");
            received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        received
    }

    #[test]
    fn test_handshake_digest() {
        // sha1("abc")
        assert_eq!(
            handshake_digest("ab", "c"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn test_handshake_then_read_stanza() {
        let (client, mut server) = duplex(4096);

        let server_task = tokio::spawn(async move {
            let opening = read_until(&mut server, "to='ps.example.com'>").await;
            assert!(opening.contains("jabber:component:accept"));
            server.write_all(SERVER_HEADER.as_bytes()).await.unwrap();

            let handshake = read_until(&mut server, "</handshake>").await;
            assert!(handshake.contains(&handshake_digest("ab", "c")));
            server
                .write_all(b"<handshake/><message to='ps.example.com'><body>x</body></message><presence type='probe' id='p1' from='a@example.com' to='ps.example.com'/>")
                .await
                .unwrap();
            server
        });

        let mut stream = ComponentStream::new(client, "ps.example.com");
        stream.handshake("c").await.unwrap();
        assert_eq!(stream.stream_id(), Some("ab"));

        let stanza = stream.read_stanza().await.unwrap().expect("presence");
        assert_eq!(stanza.name(), "presence");
        assert_eq!(stanza.id(), Some("p1"));

        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_iq_is_surfaced_for_reply() {
        let (client, mut server) = duplex(4096);

        tokio::spawn(async move {
            read_until(&mut server, "'>").await;
            server.write_all(SERVER_HEADER.as_bytes()).await.unwrap();
            read_until(&mut server, "</handshake>").await;
            server
                .write_all(b"<handshake/><iq type='get' id='bare1' from='a@example.com/x' to='ps.example.com'/>")
                .await
                .unwrap();
            server
        });

        let mut stream = ComponentStream::new(client, "ps.example.com");
        stream.handshake("c").await.unwrap();

        match stream.read_stanza().await.unwrap() {
            Some(Stanza::InvalidIq(invalid)) => assert_eq!(invalid.id, "bare1"),
            other => panic!("Expected unreadable iq, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (client, mut server) = duplex(4096);

        tokio::spawn(async move {
            read_until(&mut server, "'>").await;
            server.write_all(SERVER_HEADER.as_bytes()).await.unwrap();
            read_until(&mut server, "</handshake>").await;
            server
                .write_all(b"<stream:error><not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error></stream:stream>")
                .await
                .unwrap();
        });

        let mut stream = ComponentStream::new(client, "ps.example.com");
        match stream.handshake("wrong").await {
            Err(BridgeError::HandshakeFailed(condition)) => assert_eq!(condition, "not-authorized"),
            other => panic!("Expected handshake failure, got {:?}", other.map(|_| ())),
        }
    }
}
