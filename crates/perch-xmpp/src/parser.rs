//! Incremental framing of component streams and XML helpers.
//!
//! A component session is one long-lived XML document. Bytes are accumulated
//! in a [`StanzaFramer`] which hands out complete top-level elements as they
//! arrive, in arrival order.

use minidom::Element;

use crate::BridgeError;

/// Namespace URIs used by the bridge.
pub mod ns {
    /// XMPP client namespace (used for all stanzas the bridge emits)
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// XEP-0114 component namespace
    pub const COMPONENT_ACCEPT: &str = "jabber:component:accept";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// XEP-0060 main namespace
    pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";
    /// XEP-0060 error conditions
    pub const PUBSUB_ERRORS: &str = "http://jabber.org/protocol/pubsub#errors";
    /// Default namespace given to content store documents that declare none
    pub const STORE: &str = "urn:perch:store";
    /// Store failure details attached to error replies
    pub const STORE_ERRORS: &str = "urn:perch:store:errors";
}

/// Parsed stream header information.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// The 'to' attribute
    pub to: Option<String>,
    /// The 'from' attribute
    pub from: Option<String>,
    /// The 'id' attribute (stream ID, set by the server)
    pub id: Option<String>,
}

impl StreamHeader {
    /// Parse a stream header from raw XML data.
    ///
    /// The header is an unclosed start tag, so attributes are read directly.
    pub fn parse(data: &str) -> Result<Self, BridgeError> {
        let stream_start = data
            .find("<stream:stream")
            .ok_or_else(|| BridgeError::xml_parse("No stream:stream element found"))?;

        let stream_end = data[stream_start..]
            .find('>')
            .map(|i| stream_start + i)
            .ok_or_else(|| BridgeError::xml_parse("Incomplete stream header"))?;

        let tag = &data[stream_start..=stream_end];

        Ok(StreamHeader {
            to: extract_attribute(tag, "to"),
            from: extract_attribute(tag, "from"),
            id: extract_attribute(tag, "id"),
        })
    }
}

/// Extract an attribute value from an XML start tag string.
fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!(" {}={}", name, quote);
        if let Some(start) = tag.find(&pattern) {
            let value_start = start + pattern.len();
            if let Some(value_end) = tag[value_start..].find(quote) {
                return Some(tag[value_start..value_start + value_end].to_string());
            }
        }
    }
    None
}

/// A complete top-level unit read off the stream.
#[derive(Debug, Clone)]
pub enum Frame {
    /// `<stream:stream ...>` opening tag
    StreamHeader(StreamHeader),
    /// `</stream:stream>`
    StreamEnd,
    /// Any complete top-level element (stanza, handshake, stream error)
    Element(Element),
}

/// Incremental framer for component streams.
#[derive(Debug, Default)]
pub struct StanzaFramer {
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence split across reads
    partial: Vec<u8>,
}

impl StanzaFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes read from the socket.
    ///
    /// A multi-byte character cut by the read boundary is held back until
    /// the rest of it arrives. Invalid sequences become U+FFFD.
    pub fn feed(&mut self, data: &[u8]) {
        self.partial.extend_from_slice(data);

        loop {
            match std::str::from_utf8(&self.partial) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.partial.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.partial[..valid]));
                    match e.error_len() {
                        None => {
                            self.partial.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.partial.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Buffered, not yet framed data.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Take the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, BridgeError> {
        loop {
            let Some(start) = self.buffer.find('<') else {
                self.buffer.clear();
                return Ok(None);
            };
            // Text between top-level elements is whitespace keepalive.
            if start > 0 {
                self.buffer.drain(..start);
            }

            let rest = self.buffer.as_str();

            if rest.starts_with("<?") {
                match rest.find("?>") {
                    Some(end) => {
                        self.buffer.drain(..end + 2);
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            if rest.starts_with("</stream:stream") {
                match rest.find('>') {
                    Some(end) => {
                        self.buffer.drain(..=end);
                        return Ok(Some(Frame::StreamEnd));
                    }
                    None => return Ok(None),
                }
            }

            if rest.starts_with("<stream:stream") {
                match rest.find('>') {
                    Some(end) => {
                        let header = StreamHeader::parse(&rest[..=end])?;
                        self.buffer.drain(..=end);
                        return Ok(Some(Frame::StreamHeader(header)));
                    }
                    None => return Ok(None),
                }
            }

            let Some(end) = find_element_end(rest)? else {
                return Ok(None);
            };

            let xml: String = self.buffer.drain(..end).collect();
            let element = parse_stream_element(&xml)?;
            return Ok(Some(Frame::Element(element)));
        }
    }
}

/// Name of the element whose start tag begins at the front of `data`.
fn tag_name(data: &str) -> &str {
    let after = &data[1..];
    let end = after
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(after.len());
    &after[..end]
}

/// Byte offset just past the top-level element starting at `data[0]`,
/// tracking nesting of same-named elements.
fn find_element_end(data: &str) -> Result<Option<usize>, BridgeError> {
    let name = tag_name(data);
    if name.is_empty() {
        return Err(BridgeError::xml_parse("Element without a name"));
    }

    let mut depth = 0usize;
    let mut pos = 0usize;

    while let Some(offset) = data[pos..].find('<') {
        let tag_start = pos + offset;
        let Some(close) = data[tag_start..].find('>') else {
            return Ok(None);
        };
        let tag_end = tag_start + close;
        let tag = &data[tag_start..=tag_end];

        if let Some(closing) = tag.strip_prefix("</") {
            let closing_name = closing.trim_end_matches('>').trim();
            if closing_name == name {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(Some(tag_end + 1));
                }
            }
        } else if !tag.starts_with("<!") && !tag.starts_with("<?") && tag_name(tag) == name {
            if !tag.ends_with("/>") {
                depth += 1;
            } else if depth == 0 {
                return Ok(Some(tag_end + 1));
            }
        }

        pos = tag_end + 1;
    }

    Ok(None)
}

/// Parse one top-level stream element.
///
/// Stanzas on a component stream inherit `jabber:component:accept`; they are
/// re-homed into `jabber:client` so the stanza parsers accept them.
fn parse_stream_element(xml: &str) -> Result<Element, BridgeError> {
    let name = tag_name(xml);
    let xml = match name {
        "iq" | "presence" | "message" => {
            let rehomed = xml.replacen(
                &format!("xmlns='{}'", ns::COMPONENT_ACCEPT),
                &format!("xmlns='{}'", ns::JABBER_CLIENT),
                1,
            );
            let rehomed = rehomed.replacen(
                &format!("xmlns=\"{}\"", ns::COMPONENT_ACCEPT),
                &format!("xmlns='{}'", ns::JABBER_CLIENT),
                1,
            );
            ensure_default_namespace(&rehomed, ns::JABBER_CLIENT)
        }
        "stream:error" => xml.replacen(
            "<stream:error",
            &format!("<stream:error xmlns:stream='{}'", ns::STREAM),
            1,
        ),
        _ => ensure_default_namespace(xml, ns::COMPONENT_ACCEPT),
    };

    parse_element(&xml)
}

/// Give the root element a default namespace when it declares none.
pub fn ensure_default_namespace(xml: &str, namespace: &str) -> String {
    let Some(start) = xml.find('<') else {
        return xml.to_string();
    };
    let Some(close) = xml[start..].find('>') else {
        return xml.to_string();
    };
    let start_tag = &xml[start..start + close];
    if start_tag.contains(" xmlns=") {
        return xml.to_string();
    }

    let insert_at = start + 1 + tag_name(&xml[start..]).len();
    let mut out = String::with_capacity(xml.len() + namespace.len() + 10);
    out.push_str(&xml[..insert_at]);
    out.push_str(&format!(" xmlns='{}'", namespace));
    out.push_str(&xml[insert_at..]);
    out
}

/// Strip a leading XML declaration and surrounding whitespace.
pub fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

/// Parse a string into a minidom Element.
pub fn parse_element(data: &str) -> Result<Element, BridgeError> {
    data.parse::<Element>()
        .map_err(|e| BridgeError::xml_parse(format!("Failed to parse element: {}", e)))
}

/// Convert a minidom Element back to an XML string.
pub fn element_to_string(element: &Element) -> Result<String, BridgeError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| BridgeError::xml_parse(format!("Failed to serialize element: {}", e)))?;
    String::from_utf8(output).map_err(|e| BridgeError::xml_parse(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_header_parsing() {
        let header_xml = r#"<?xml version='1.0'?><stream:stream xmlns='jabber:component:accept' xmlns:stream='http://etherx.jabber.org/streams' from='pubsub.example.com' id='3BF96D32'>"#;

        let header = StreamHeader::parse(header_xml).unwrap();

        assert_eq!(header.from, Some("pubsub.example.com".to_string()));
        assert_eq!(header.id, Some("3BF96D32".to_string()));
        assert_eq!(header.to, None);
    }

    #[test]
    fn test_stream_header_with_double_quotes() {
        let header = StreamHeader::parse(r#"<stream:stream from="host" id="abc">"#).unwrap();

        assert_eq!(header.id, Some("abc".to_string()));
    }

    #[test]
    fn test_framer_yields_header_then_stanza() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"<?xml version='1.0'?><stream:stream xmlns='jabber:component:accept' xmlns:stream='http://etherx.jabber.org/streams' id='s1'>");
        framer.feed(b"<handshake/>");

        match framer.next_frame().unwrap() {
            Some(Frame::StreamHeader(h)) => assert_eq!(h.id.as_deref(), Some("s1")),
            other => panic!("Expected header, got {:?}", other),
        }
        match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => assert_eq!(e.name(), "handshake"),
            other => panic!("Expected handshake, got {:?}", other),
        }
        assert!(framer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_framer_waits_for_partial_stanza() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"<iq type='get' id='a1' from='u@example.com' to='ps.example.com'><pubsub xmlns='http://jabber.org/protocol/pubsub'>");

        assert!(framer.next_frame().unwrap().is_none());

        framer.feed(b"<items node='notes'/></pubsub></iq>");
        match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => {
                assert_eq!(e.name(), "iq");
                assert_eq!(e.ns(), ns::JABBER_CLIENT);
                assert_eq!(e.attr("id"), Some("a1"));
            }
            other => panic!("Expected iq, got {:?}", other),
        }
    }

    #[test]
    fn test_framer_preserves_arrival_order() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"<presence type='probe' id='p1'/><iq type='get' id='i1'><ping xmlns='urn:xmpp:ping'/></iq>");

        let first = framer.next_frame().unwrap();
        let second = framer.next_frame().unwrap();

        assert!(matches!(first, Some(Frame::Element(ref e)) if e.name() == "presence"));
        assert!(matches!(second, Some(Frame::Element(ref e)) if e.name() == "iq"));
    }

    #[test]
    fn test_framer_rehomes_component_namespace() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"<presence xmlns='jabber:component:accept' type='subscribe' id='x'/>");

        match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => assert_eq!(e.ns(), ns::JABBER_CLIENT),
            other => panic!("Expected presence, got {:?}", other),
        }
    }

    #[test]
    fn test_framer_joins_character_split_across_reads() {
        let xml = "<presence id='p1'><status>café</status></presence>".as_bytes();
        let split = xml.iter().position(|&b| b == 0xC3).expect("first byte of é") + 1;

        let mut framer = StanzaFramer::new();
        framer.feed(&xml[..split]);
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(&xml[split..]);

        match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => {
                let status = e.get_child("status", ns::JABBER_CLIENT).expect("status");
                assert_eq!(status.text(), "café");
            }
            other => panic!("Expected presence, got {:?}", other),
        }
    }

    #[test]
    fn test_framer_replaces_invalid_bytes() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"<presence id='p1'><status>a\xFFb</status></presence>");

        match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => {
                let status = e.get_child("status", ns::JABBER_CLIENT).expect("status");
                assert_eq!(status.text(), "a\u{FFFD}b");
            }
            other => panic!("Expected presence, got {:?}", other),
        }
    }

    #[test]
    fn test_framer_stream_end() {
        let mut framer = StanzaFramer::new();
        framer.feed(b"  </stream:stream>");

        assert!(matches!(framer.next_frame().unwrap(), Some(Frame::StreamEnd)));
    }

    #[test]
    fn test_ensure_default_namespace() {
        assert_eq!(
            ensure_default_namespace("<notes><note/></notes>", ns::STORE),
            "<notes xmlns='urn:perch:store'><note/></notes>"
        );
        assert_eq!(
            ensure_default_namespace("<note xmlns='urn:x'/>", ns::STORE),
            "<note xmlns='urn:x'/>"
        );
    }

    #[test]
    fn test_strip_xml_declaration() {
        assert_eq!(
            strip_xml_declaration("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<note/>"),
            "<note/>"
        );
        assert_eq!(strip_xml_declaration("  <note/> "), "<note/>");
    }

    #[test]
    fn test_element_to_string_roundtrip() {
        let xml = "<presence xmlns='jabber:client' to='bob@example.com' type='subscribed'/>";
        let element = parse_element(xml).unwrap();
        let output = element_to_string(&element).unwrap();

        let element2 = parse_element(&output).unwrap();
        assert_eq!(element.name(), element2.name());
        assert_eq!(element.attr("to"), element2.attr("to"));
    }
}
