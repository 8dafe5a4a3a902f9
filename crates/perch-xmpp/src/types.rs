//! Common types for the bridge.

use jid::Jid;
use minidom::Element;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Presence;

use crate::error::{BadRequestDetail, ErrorCondition};
use crate::parser::element_to_string;
use crate::BridgeError;

/// A stanza the bridge consumes or produces.
#[derive(Debug, Clone)]
pub enum Stanza {
    Presence(Presence),
    Iq(Iq),
    /// Get/set IQ that does not carry exactly one payload element
    InvalidIq(InvalidIq),
}

/// A get/set IQ whose payload could not be read.
///
/// It still owes the sender exactly one reply, so the addressing is kept.
#[derive(Debug, Clone)]
pub struct InvalidIq {
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub id: String,
    /// Number of child elements found
    pub payload_count: usize,
    /// The element as received
    pub element: Element,
}

impl InvalidIq {
    /// Addressing of a get/set IQ that does not carry exactly one payload.
    ///
    /// Returns `None` when the IQ has one payload, or when there is nothing
    /// to answer: not a get/set, no id, or unreadable addresses.
    fn from_element(element: &Element) -> Option<Self> {
        if !matches!(element.attr("type"), Some("get") | Some("set")) {
            return None;
        }
        let payload_count = element.children().count();
        if payload_count == 1 {
            return None;
        }
        let id = element.attr("id")?.to_string();
        let from = element.attr("from").map(str::parse::<Jid>).transpose().ok()?;
        let to = element.attr("to").map(str::parse::<Jid>).transpose().ok()?;

        Some(Self {
            from,
            to,
            id,
            payload_count,
            element: element.clone(),
        })
    }

    /// `feature-not-implemented` for a missing payload, `bad-request` for
    /// several.
    pub fn condition(&self) -> ErrorCondition {
        if self.payload_count == 0 {
            ErrorCondition::feature_not_implemented()
        } else {
            ErrorCondition::bad_request(BadRequestDetail::InvalidPayload)
        }
    }

    /// Error reply addressed back to the sender.
    pub fn error_reply(&self) -> Iq {
        Iq {
            from: self.to.clone(),
            to: self.from.clone(),
            id: self.id.clone(),
            payload: IqType::Error(self.condition().to_stanza_error()),
        }
    }
}

impl Stanza {
    /// Get the stanza type name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) | Stanza::InvalidIq(_) => "iq",
        }
    }

    /// The stanza id, if it carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Presence(p) => p.id.as_deref(),
            Stanza::Iq(iq) => Some(iq.id.as_str()),
            Stanza::InvalidIq(iq) => Some(iq.id.as_str()),
        }
    }

    /// Parse a presence or iq element.
    ///
    /// Returns `Ok(None)` for elements the bridge does not consume (messages).
    /// A get/set IQ that fails to parse but can still be answered comes back
    /// as [`Stanza::InvalidIq`].
    pub fn from_element(element: Element) -> Result<Option<Self>, BridgeError> {
        match element.name() {
            "presence" => Presence::try_from(element)
                .map(|p| Some(Stanza::Presence(p)))
                .map_err(|e| BridgeError::xml_parse(format!("Invalid presence: {:?}", e))),
            "iq" => match InvalidIq::from_element(&element) {
                Some(invalid) => Ok(Some(Stanza::InvalidIq(invalid))),
                None => Iq::try_from(element)
                    .map(|iq| Some(Stanza::Iq(iq)))
                    .map_err(|e| BridgeError::xml_parse(format!("Invalid iq: {:?}", e))),
            },
            _ => Ok(None),
        }
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> Result<String, BridgeError> {
        let element: Element = self.clone().into();
        element_to_string(&element)
    }
}

impl From<Stanza> for Element {
    fn from(stanza: Stanza) -> Element {
        match stanza {
            Stanza::Presence(p) => p.into(),
            Stanza::Iq(iq) => iq.into(),
            Stanza::InvalidIq(invalid) => invalid.element,
        }
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Self {
        Stanza::Presence(p)
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Stanza::Iq(iq)
    }
}

/// IQ type name for tracing.
pub fn iq_type_name(iq: &Iq) -> &'static str {
    match iq.payload {
        IqType::Get(_) => "get",
        IqType::Set(_) => "set",
        IqType::Result(_) => "result",
        IqType::Error(_) => "error",
    }
}
