//! Minimal SOAP 1.1 plumbing: envelopes carrying a WS-Security username token, and a lenient
//! reader that pulls the leaf elements out of a response body.
use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

#[derive(Error, Debug)]
pub enum SoapError {
    #[error("response is not well-formed XML: {0}")]
    XmlError(#[from] quick_xml::Error),
}

/// Username token credentials. The destination expects the already-hashed password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Wrap `body` in a SOAP envelope with a WS-Security header.
///
/// `namespaces` are `(prefix, uri)` pairs declared on the envelope so the body can use them.
/// The body is inserted verbatim; callers are responsible for escaping its content.
pub fn envelope(credentials: &Credentials, namespaces: &[(&str, &str)], body: &str) -> String {
    let declarations: String = namespaces
        .iter()
        .map(|(prefix, uri)| format!(r#" xmlns:{prefix}="{}""#, escape(*uri)))
        .collect();

    format!(
        r#"<soapenv:Envelope xmlns:soapenv="{SOAP_ENVELOPE_NS}"{declarations}><soapenv:Header><wsse:Security soapenv:mustUnderstand="1" xmlns:wsse="{WSSE_NS}"><wsse:UsernameToken wsu:Id="UsernameToken-27777511" xmlns:wsu="{WSU_NS}"><wsse:Username>{}</wsse:Username><wsse:Password Type="{PASSWORD_TEXT}">{}</wsse:Password></wsse:UsernameToken></wsse:Security></soapenv:Header><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"#,
        escape(credentials.username.as_str()),
        escape(credentials.password.as_str()),
    )
}

/// Build `<prefix:name>text</prefix:name>` with `text` escaped.
pub fn text_element(name: &str, text: &str) -> String {
    format!("<{name}>{}</{name}>", escape(text))
}

/// The interesting parts of a SOAP response: leaf elements outside the header, keyed by
/// their local name, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoapResult {
    leaves: Vec<(String, String)>,
}

impl SoapResult {
    /// Parse a response document. Elements inside `Header` are ignored.
    pub fn parse(xml: &str) -> Result<Self, SoapError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        // (local name, accumulated text, has child elements)
        let mut stack: Vec<(String, String, bool)> = Vec::new();
        let mut header_depth: Option<usize> = None;
        let mut leaves = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.2 = true;
                    }
                    if header_depth.is_none() && name == "Header" {
                        header_depth = Some(stack.len());
                    }
                    stack.push((name, String::new(), false));
                }
                Event::Empty(empty) => {
                    let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.2 = true;
                    }
                    if header_depth.is_none() {
                        leaves.push((name, String::new()));
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.1.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.1.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    if let Some((name, text, has_children)) = stack.pop() {
                        if header_depth == Some(stack.len()) {
                            header_depth = None;
                        } else if header_depth.is_none() && !has_children {
                            leaves.push((name, text.trim().to_owned()));
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self { leaves })
    }

    fn first(&self, local_name: &str) -> Option<&str> {
        self.leaves
            .iter()
            .find(|(name, _)| name == local_name)
            .map(|(_, text)| text.as_str())
    }

    /// Text of the first `result` element.
    pub fn result(&self) -> Option<&str> {
        self.first("result")
    }

    /// Text of the first `error` element.
    pub fn error(&self) -> Option<&str> {
        self.first("error")
    }

    /// Text of the `faultstring` element, when the response is a SOAP fault.
    pub fn fault(&self) -> Option<&str> {
        self.first("faultstring")
    }

    pub fn is_success(&self) -> bool {
        self.result().is_some_and(|result| result.contains("Success"))
    }

    /// Text of the last leaf that is not part of the standard result shape. The destination
    /// appends identifiers it assigned this way, outside of its published schema.
    pub fn last_extra(&self) -> Option<&str> {
        self.leaves
            .iter()
            .rev()
            .find(|(name, _)| {
                !matches!(
                    name.as_str(),
                    "result" | "error" | "warning" | "faultcode" | "faultstring"
                )
            })
            .map(|(_, text)| text.as_str())
    }
}
