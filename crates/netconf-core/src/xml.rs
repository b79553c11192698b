//! Minimal XML helpers for reply handling.
//!
//! The transport only ever needs to classify a reply, lift the raw contents
//! of one element, and read the text fields of an rpc-error; everything else
//! in a reply is opaque payload handed to the caller untouched.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{NetconfError, NetconfResult, RpcError};

/// True when an element with the given local name occurs anywhere in `xml`.
pub(crate) fn contains_element(xml: &str, local: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().local_name().as_ref() == local.as_bytes() => return true,
            Ok(Event::Empty(e)) if e.name().local_name().as_ref() == local.as_bytes() => return true,
            Ok(Event::Eof) | Err(_) => return false,
            _ => {}
        }
    }
}

/// The raw text between the start and end tags of the first element with the
/// given local name. Nested elements of the same name stay intact; namespaced
/// payloads survive byte-for-byte.
pub(crate) fn element_inner(xml: &str, local: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut inner_start = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().local_name().as_ref() == local.as_bytes() => {
                if depth == 0 {
                    inner_start = Some(reader.buffer_position() as usize);
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) if depth == 0 && e.name().local_name().as_ref() == local.as_bytes() => {
                return Some(String::new());
            }
            Ok(Event::End(e)) if e.name().local_name().as_ref() == local.as_bytes() => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let start = inner_start?;
                    let end_of_close = reader.buffer_position() as usize;
                    let close_start = xml[..end_of_close].rfind('<')?;
                    return Some(xml[start..close_start].to_string());
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Capture the last `rpc-error` in a reply, if any.
pub(crate) fn parse_rpc_error(xml: &str) -> Option<RpcError> {
    let mut reader = Reader::from_str(xml);
    let mut error = RpcError::default();
    let mut found = false;
    let mut in_error = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if name == "rpc-error" {
                    // a reply can carry several; the last one wins
                    error = RpcError::default();
                    found = true;
                    in_error = true;
                } else if in_error {
                    current = Some(name);
                }
            }
            Ok(Event::Text(text)) => {
                if let (true, Some(field)) = (in_error, current.as_deref()) {
                    if let Ok(value) = text.unescape() {
                        let value = value.trim();
                        if !value.is_empty() {
                            assign_error_field(&mut error, field, value.to_string());
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().local_name().as_ref() == b"rpc-error" {
                    in_error = false;
                }
                current = None;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    found.then_some(error)
}

fn assign_error_field(error: &mut RpcError, field: &str, value: String) {
    match field {
        "error-message" => error.message = Some(value),
        "error-tag" => error.tag = Some(value),
        "error-type" => error.error_type = Some(value),
        "error-severity" => error.severity = Some(value),
        "error-app-tag" => error.app_tag = Some(value),
        "error-path" => error.path = Some(value),
        "bad-attribute" => error.bad_attribute = Some(value),
        "bad-element" => error.bad_element = Some(value),
        "bad-namespace" => error.bad_namespace = Some(value),
        "session-id" => error.session_id = Some(value),
        _ => {}
    }
}

/// Pull the device session id and capability list out of a peer hello.
pub(crate) fn parse_peer_hello(xml: &str) -> NetconfResult<(String, Vec<String>)> {
    #[derive(Clone, Copy)]
    enum Field {
        Capability,
        SessionId,
    }

    let mut reader = Reader::from_str(xml);
    let mut capabilities = Vec::new();
    let mut session_id = None;
    let mut current = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = match e.name().local_name().as_ref() {
                    b"capability" => Some(Field::Capability),
                    b"session-id" => Some(Field::SessionId),
                    _ => None,
                };
            }
            Ok(Event::Text(text)) => {
                if let Some(field) = current {
                    if let Ok(value) = text.unescape() {
                        let value = value.trim().to_string();
                        if !value.is_empty() {
                            match field {
                                Field::Capability => capabilities.push(value),
                                Field::SessionId => session_id = Some(value),
                            }
                        }
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(err) => return Err(NetconfError::Hello(err.to_string())),
            _ => {}
        }
    }

    let session_id = session_id.ok_or_else(|| NetconfError::Hello("missing session-id".to_string()))?;
    if capabilities.is_empty() {
        return Err(NetconfError::Hello("missing capabilities".to_string()));
    }
    Ok((session_id, capabilities))
}
