//! XML records exchanged with the comment server.
//!
//! Inbound frames are dispatched on their root element name:
//!
//! | root          | record                |
//! |---------------|-----------------------|
//! | `thread`      | [`HandshakeAck`]      |
//! | `chat`        | [`Chat`]              |
//! | `chat_result` | [`PostAck`]           |
//!
//! Any other well-formed root is ignored so newer server extensions do not
//! break older clients.

use std::borrow::Cow;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use serde::Serialize;

use crate::error::{DecodeError, EncodeError};
use crate::mail::Mail;

/// Protocol version sent in the thread handshake.
pub const THREAD_VERSION: i64 = 20061206;

/// Server acknowledgement of a thread join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandshakeAck {
    pub resultcode: i64,
    pub thread: i64,
    pub last_res: i64,
    pub ticket: String,
    pub revision: i64,
    pub server_time: i64,
}

impl HandshakeAck {
    pub fn is_success(&self) -> bool {
        self.resultcode == 0
    }
}

/// A single comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub thread: i64,
    pub no: i64,
    /// Centiseconds since the broadcast base time.
    pub vpos: i64,
    /// Unix seconds.
    pub date: i64,
    pub date_usec: i64,
    pub mail: String,
    /// Set when the comment was posted by this connection's user.
    pub yourpost: bool,
    pub user_id: String,
    pub premium: i64,
    pub anonymity: i64,
    pub locale: String,
    pub score: i64,
    pub content: String,
}

impl Chat {
    /// Wall clock time the comment was accepted by the server.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.date_usec.checked_mul(1_000)?).ok()?;
        DateTime::from_timestamp(self.date, nanos)
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymity != 0
    }

    /// Decoration options carried in the `mail` attribute.
    pub fn decoration(&self) -> Mail {
        Mail::parse_lenient(&self.mail)
    }
}

/// Result of a comment this connection posted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostAck {
    pub thread: i64,
    pub status: i64,
    pub no: i64,
}

impl PostAck {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// A recognised inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    HandshakeAck(HandshakeAck),
    Chat(Chat),
    PostAck(PostAck),
}

/// Attributes of a root element, unescaped.
struct Attributes {
    element: &'static str,
    values: Vec<(String, String)>,
}

impl Attributes {
    fn collect(element: &'static str, start: &BytesStart<'_>) -> Result<Self, DecodeError> {
        let mut values = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(DecodeError::xml)?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_owned();
            let value = attr.unescape_value().map_err(DecodeError::xml)?;
            values.push((key, value.into_owned()));
        }
        Ok(Self { element, values })
    }

    fn raw(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn string(&self, name: &str) -> String {
        self.raw(name).unwrap_or_default().to_owned()
    }

    /// Missing attributes read as zero.
    fn int(&self, name: &str) -> Result<i64, DecodeError> {
        match self.raw(name) {
            None => Ok(0),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidAttribute {
                    element: self.element,
                    name: name.to_owned(),
                    value: value.to_owned(),
                }),
        }
    }
}

/// Decode one frame (terminator already stripped).
///
/// Returns `Ok(None)` for well-formed records of an unknown kind.
pub fn decode_record(frame: &[u8]) -> Result<Option<Record>, DecodeError> {
    let text = std::str::from_utf8(frame)?;
    let mut reader = Reader::from_str(text);

    let (start, empty) = read_root(&mut reader)?;
    let content = if empty {
        String::new()
    } else {
        read_direct_text(&mut reader)?
    };

    let record = match start.name().as_ref() {
        b"thread" => {
            let attrs = Attributes::collect("thread", &start)?;
            Record::HandshakeAck(HandshakeAck {
                resultcode: attrs.int("resultcode")?,
                thread: attrs.int("thread")?,
                last_res: attrs.int("last_res")?,
                ticket: attrs.string("ticket"),
                revision: attrs.int("revision")?,
                server_time: attrs.int("server_time")?,
            })
        }
        b"chat" => {
            let attrs = Attributes::collect("chat", &start)?;
            Record::Chat(Chat {
                thread: attrs.int("thread")?,
                no: attrs.int("no")?,
                vpos: attrs.int("vpos")?,
                date: attrs.int("date")?,
                date_usec: attrs.int("date_usec")?,
                mail: attrs.string("mail"),
                yourpost: attrs.int("yourpost")? != 0,
                user_id: attrs.string("user_id"),
                premium: attrs.int("premium")?,
                anonymity: attrs.int("anonymity")?,
                locale: attrs.string("locale"),
                score: attrs.int("score")?,
                content,
            })
        }
        b"chat_result" => {
            let attrs = Attributes::collect("chat_result", &start)?;
            Record::PostAck(PostAck {
                thread: attrs.int("thread")?,
                status: attrs.int("status")?,
                no: attrs.int("no")?,
            })
        }
        _ => return Ok(None),
    };

    Ok(Some(record))
}

/// Skip the prolog and return the root start tag and whether it is self-closing.
fn read_root<'a>(reader: &mut Reader<&'a [u8]>) -> Result<(BytesStart<'a>, bool), DecodeError> {
    loop {
        match reader.read_event().map_err(DecodeError::xml)? {
            Event::Start(start) => return Ok((start, false)),
            Event::Empty(start) => return Ok((start, true)),
            Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => {}
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => return Err(DecodeError::xml("frame contains no element")),
            other => {
                return Err(DecodeError::xml(format!(
                    "unexpected {other:?} before root element"
                )));
            }
        }
    }
}

/// Collect the text directly inside the current element, up to its end tag.
///
/// Whitespace is kept as sent; text of nested elements is skipped.
fn read_direct_text(reader: &mut Reader<&[u8]>) -> Result<String, DecodeError> {
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(DecodeError::xml)? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(text),
            Event::End(_) => depth -= 1,
            Event::Text(t) if depth == 0 => {
                let unescaped: Cow<'_, str> = t.unescape().map_err(DecodeError::xml)?;
                text.push_str(&unescaped);
            }
            Event::CData(c) if depth == 0 => text.push_str(std::str::from_utf8(&c)?),
            Event::Eof => return Err(DecodeError::xml("frame ended inside an element")),
            _ => {}
        }
    }
}

/// Thread join request, the first record written on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRequest {
    pub thread: i64,
    pub version: i64,
    pub res_from: i64,
}

impl ThreadRequest {
    pub fn new(thread: i64, res_from: i64) -> Self {
        Self {
            thread,
            version: THREAD_VERSION,
            res_from,
        }
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .create_element("thread")
            .with_attribute(("thread", self.thread.to_string().as_str()))
            .with_attribute(("version", self.version.to_string().as_str()))
            .with_attribute(("res_from", self.res_from.to_string().as_str()))
            .write_empty()
            .map_err(EncodeError::new)?;
        Ok(Bytes::from(writer.into_inner()))
    }
}

/// A comment ready to be written to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChat {
    pub vpos: i64,
    pub mail: String,
    pub user_id: String,
    pub postkey: String,
    pub content: String,
}

impl OutgoingChat {
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let vpos = self.vpos.to_string();
        let mut writer = Writer::new(Vec::new());

        let mut element = writer
            .create_element("chat")
            .with_attribute(("vpos", vpos.as_str()));
        if !self.mail.is_empty() {
            element = element.with_attribute(("mail", self.mail.as_str()));
        }
        element
            .with_attribute(("user_id", self.user_id.as_str()))
            .with_attribute(("postkey", self.postkey.as_str()))
            .write_text_content(BytesText::new(&self.content))
            .map_err(EncodeError::new)?;

        Ok(Bytes::from(writer.into_inner()))
    }
}
