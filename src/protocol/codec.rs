//! Wire codec for command channel messages.
//!
//! Inbound frames are JSON objects of the form
//! `{"cmd": <string>, "rid"?: <string>, "uri"?: <string>, "message"?: <string>}`.
//! The command name is matched case-insensitively.

use serde::Deserialize;
use serde_json::{json, Value};

use super::command::{Command, ResourceRequest};
use crate::error::{GatewayError, Result};

/// Inbound message envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    cmd: Option<String>,
    #[serde(default)]
    rid: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode an inbound command channel message.
///
/// # Errors
///
/// Returns [`GatewayError::Decode`] when the text is blank, is not a JSON
/// object, has no string `cmd`, names an unknown command, or lacks the
/// `rid`/`uri` strings a resource request needs.
pub fn parse(text: &str) -> Result<Command> {
    if text.trim().is_empty() {
        return Err(GatewayError::Decode("empty message".to_string()));
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| GatewayError::Decode(format!("malformed JSON: {e}")))?;

    if !value.is_object() {
        return Err(GatewayError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| GatewayError::Decode(format!("invalid command fields: {e}")))?;

    let name = envelope
        .cmd
        .ok_or_else(|| GatewayError::Decode("missing command name".to_string()))?;

    if name.eq_ignore_ascii_case("getResource") {
        return Ok(Command::GetResource(resource_request(
            &name,
            envelope.rid,
            envelope.uri,
        )?));
    }
    if name.eq_ignore_ascii_case("getHtml") {
        return Ok(Command::GetHtml(resource_request(
            &name,
            envelope.rid,
            envelope.uri,
        )?));
    }
    if name.eq_ignore_ascii_case("authenticationSuccess") {
        return Ok(Command::AuthenticationSuccess);
    }
    if name.eq_ignore_ascii_case("authenticationError") {
        return Ok(Command::AuthenticationError);
    }
    if name.eq_ignore_ascii_case("disconnect") {
        return Ok(Command::Disconnect {
            reason: envelope.message,
        });
    }

    Err(GatewayError::Decode(format!("unknown command {name}")))
}

/// Encode a command in its wire form.
pub fn encode(command: &Command) -> String {
    let request = command.request();
    let message = match command {
        Command::Disconnect { reason } => reason.as_deref(),
        _ => None,
    };

    let mut envelope = serde_json::Map::new();
    envelope.insert("cmd".into(), json!(command.name()));
    if let Some(request) = request {
        envelope.insert("rid".into(), json!(request.id));
        envelope.insert("uri".into(), json!(request.uri));
    }
    if let Some(message) = message {
        envelope.insert("message".into(), json!(message));
    }

    Value::Object(envelope).to_string()
}

fn resource_request(
    name: &str,
    rid: Option<String>,
    uri: Option<String>,
) -> Result<ResourceRequest> {
    let id = rid.ok_or_else(|| GatewayError::Decode(format!("{name}: missing rid")))?;
    let uri = uri.ok_or_else(|| GatewayError::Decode(format!("{name}: missing uri")))?;
    Ok(ResourceRequest { id, uri })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_decode_error(text: &str) {
        match parse(text) {
            Err(GatewayError::Decode(_)) => {},
            other => panic!("expected decode error for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_get_html() {
        let cmd = parse(r#"{"cmd":"getHtml","rid":"0000","uri":"fileuri"}"#).unwrap();
        assert_eq!(cmd, Command::GetHtml(ResourceRequest::new("0000", "fileuri")));
    }

    #[test]
    fn test_parse_get_resource() {
        let cmd = parse(r#"{"cmd":"getResource","rid":"0000","uri":"fileuri"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::GetResource(ResourceRequest::new("0000", "fileuri"))
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            parse(r#"{"cmd":"AUTHENTICATIONSUCCESS"}"#).unwrap(),
            Command::AuthenticationSuccess
        );
        assert_eq!(
            parse(r#"{"cmd":"authenticationerror"}"#).unwrap(),
            Command::AuthenticationError
        );
        assert!(matches!(
            parse(r#"{"cmd":"GETHTML","rid":"1","uri":"u"}"#).unwrap(),
            Command::GetHtml(_)
        ));
    }

    #[test]
    fn test_parse_disconnect() {
        assert_eq!(
            parse(r#"{"cmd":"disconnect","message":"replaced by newer client"}"#).unwrap(),
            Command::Disconnect {
                reason: Some("replaced by newer client".to_string())
            }
        );
        assert_eq!(
            parse(r#"{"cmd":"disconnect"}"#).unwrap(),
            Command::Disconnect { reason: None }
        );
        assert_eq!(
            parse(r#"{"cmd":"disconnect","message":null}"#).unwrap(),
            Command::Disconnect { reason: None }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_decode_error("");
        assert_decode_error("   ");
        assert_decode_error("null");
        assert_decode_error("[]");
        assert_decode_error("\"getHtml\"");
        assert_decode_error("42");
        assert_decode_error("{}");
        assert_decode_error(r#"{"cmd":null}"#);
        assert_decode_error(r#"{"cmd":7}"#);
        assert_decode_error(r#"{"cmd":"reboot"}"#);
        assert_decode_error(r#"{"cmd":"getHtml","#);
        assert_decode_error(r#"{"cmd":"getHtml","uri":"fileuri"}"#);
        assert_decode_error(r#"{"cmd":"getResource","rid":"0000"}"#);
        assert_decode_error(r#"{"cmd":"getResource","rid":12,"uri":"fileuri"}"#);
    }

    #[test]
    fn test_encode_resource_commands() {
        let cmd = Command::GetResource(ResourceRequest::new("r1", "/img/logo.png"));
        let json: serde_json::Value = serde_json::from_str(&encode(&cmd)).unwrap();

        assert_eq!(json["cmd"], "getResource");
        assert_eq!(json["rid"], "r1");
        assert_eq!(json["uri"], "/img/logo.png");
        assert_eq!(parse(&encode(&cmd)).unwrap(), cmd);
    }

    #[test]
    fn test_encode_omits_absent_fields() {
        let json: serde_json::Value =
            serde_json::from_str(&encode(&Command::AuthenticationSuccess)).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "authenticationSuccess"}));
    }

    #[test]
    fn test_encode_disconnect_message() {
        let cmd = Command::Disconnect {
            reason: Some("maintenance \"window\"".to_string()),
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&cmd)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"cmd": "disconnect", "message": "maintenance \"window\""})
        );
        assert_eq!(parse(&encode(&cmd)).unwrap(), cmd);
    }
}
