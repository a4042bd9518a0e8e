use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// What a decoded frame is, inferred from the fields it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Acknowledgement of a command, carries `result`.
    Command,
    /// The bulb rejected a command.
    Error,
    /// Unsolicited property change, or anything that is neither of the above.
    Notification,
}

impl Display for ResponseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ResponseKind::Command => "command",
            ResponseKind::Error => "error",
            ResponseKind::Notification => "notification",
        };
        write!(f, "{}", kind)
    }
}

/// The `error` object of a rejected command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Frame layout as sent by the bulb. Every field is optional.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Vec<String>>,
    #[serde(default)]
    error: Option<Map<String, Value>>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// A decoded frame from the bulb.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// `None` when the frame had no id or an id of zero. Any other integer
    /// is kept, even one this library would never send.
    pub id: Option<i64>,
    /// Set on notifications, usually `"props"`.
    pub method: Option<String>,
    pub result: Vec<String>,
    pub error: Option<DeviceError>,
    pub params: Map<String, Value>,
    kind: ResponseKind,
}

impl Response {
    /// Decodes one line of wire data.
    ///
    /// Surrounding whitespace, including the line terminator, is ignored, as
    /// are fields this library does not know about.
    pub fn parse(line: &str) -> Result<Self> {
        let wire: WireResponse =
            serde_json::from_str(line.trim()).map_err(Error::MalformedResponse)?;

        let error = match wire.error {
            Some(map) if !map.is_empty() => Some(
                serde_json::from_value(Value::Object(map)).map_err(Error::MalformedResponse)?,
            ),
            _ => None,
        };

        let mut response = Response {
            id: wire.id.filter(|id| *id != 0),
            method: wire.method,
            result: wire.result.unwrap_or_default(),
            error,
            params: wire.params.unwrap_or_default(),
            kind: ResponseKind::Notification,
        };
        response.kind = response.classify();
        Ok(response)
    }

    /// Error wins over result; without an id everything is a notification.
    fn classify(&self) -> ResponseKind {
        match self.id {
            Some(_) if self.error.is_some() => ResponseKind::Error,
            Some(_) if !self.result.is_empty() => ResponseKind::Command,
            _ => ResponseKind::Notification,
        }
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// True when the frame carries the id of command `command_id`.
    pub fn answers(&self, command_id: u32) -> bool {
        self.id == Some(i64::from(command_id))
    }

    /// True for the plain `["ok"]` acknowledgement.
    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Command && self.result.len() == 1 && self.result[0] == "ok"
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ResponseKind::Command => write!(
                f,
                "[{}] result: {}",
                self.id.unwrap_or_default(),
                self.result.join(", ")
            ),
            ResponseKind::Error => match &self.error {
                Some(error) => write!(f, "[{}] error: {}", self.id.unwrap_or_default(), error),
                None => write!(f, "[{}] error", self.id.unwrap_or_default()),
            },
            ResponseKind::Notification => {
                write!(f, "notification: {}", Value::Object(self.params.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_acknowledgement() {
        let response = Response::parse("{\"id\":1,\"result\":[\"ok\"],\"error\":null}\r\n").unwrap();
        assert_eq!(response.kind(), ResponseKind::Command);
        assert_eq!(response.id, Some(1));
        assert_eq!(response.result, vec!["ok".to_string()]);
        assert!(response.error.is_none());
        assert!(response.is_ok());
    }

    #[test]
    fn test_error_takes_precedence_over_result() {
        let response = Response::parse(
            r#"{"id":1,"result":["ok"],"error":{"code":1,"message":"m"}}"#,
        )
        .unwrap();
        assert_eq!(response.kind(), ResponseKind::Error);
        assert_eq!(
            response.error,
            Some(DeviceError {
                code: 1,
                message: "m".to_string()
            })
        );
        assert!(!response.is_ok());
    }

    #[test]
    fn test_params_without_result_is_notification() {
        let response = Response::parse(r#"{"id":1,"params":{"bright":100}}"#).unwrap();
        assert_eq!(response.kind(), ResponseKind::Notification);
        assert_eq!(response.params.get("bright"), Some(&Value::from(100)));
    }

    #[test]
    fn test_props_notification_keeps_method() {
        let response =
            Response::parse(r#"{"method":"props","params":{"power":"on","bright":"10"}}"#)
                .unwrap();
        assert_eq!(response.kind(), ResponseKind::Notification);
        assert_eq!(response.id, None);
        assert_eq!(response.method.as_deref(), Some("props"));
        assert_eq!(response.params.len(), 2);
    }

    #[test]
    fn test_empty_payload_is_notification() {
        let response = Response::parse("{}").unwrap();
        assert_eq!(response.kind(), ResponseKind::Notification);
        assert!(response.params.is_empty());
        assert!(response.result.is_empty());
    }

    #[test]
    fn test_error_without_id_is_notification() {
        let response =
            Response::parse(r#"{"error":{"code":-1,"message":"unsupported method"}}"#).unwrap();
        assert_eq!(response.kind(), ResponseKind::Notification);
        assert!(response.error.is_some());
    }

    #[test]
    fn test_zero_id_counts_as_absent() {
        let response = Response::parse(r#"{"id":0,"result":["ok"]}"#).unwrap();
        assert_eq!(response.id, None);
        assert_eq!(response.kind(), ResponseKind::Notification);
    }

    #[test]
    fn test_ids_outside_the_command_range_are_kept() {
        let negative = Response::parse(r#"{"id":-1,"result":["ok"]}"#).unwrap();
        assert_eq!(negative.id, Some(-1));
        assert_eq!(negative.kind(), ResponseKind::Command);

        let large = Response::parse(r#"{"id":8589934592,"error":{"code":-1}}"#).unwrap();
        assert_eq!(large.id, Some(8_589_934_592));
        assert_eq!(large.kind(), ResponseKind::Error);
        assert!(!large.answers(0));
    }

    #[test]
    fn test_answers_matches_command_id() {
        let response = Response::parse(r#"{"id":42,"result":["ok"]}"#).unwrap();
        assert!(response.answers(42));
        assert!(!response.answers(43));
        let notification = Response::parse(r#"{"method":"props","params":{}}"#).unwrap();
        assert!(!notification.answers(0));
    }

    #[test]
    fn test_empty_error_object_is_ignored() {
        let response = Response::parse(r#"{"id":5,"result":["on","100"],"error":{}}"#).unwrap();
        assert_eq!(response.kind(), ResponseKind::Command);
        assert_eq!(response.result, vec!["on".to_string(), "100".to_string()]);
    }

    #[test]
    fn test_error_object_with_extra_fields() {
        let response =
            Response::parse(r#"{"id":9,"error":{"code":-5000,"message":"general error","x":1}}"#)
                .unwrap();
        assert_eq!(response.kind(), ResponseKind::Error);
        assert_eq!(response.error.map(|e| e.code), Some(-5000));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let response =
            Response::parse(r#"{"id":2,"result":["ok"],"firmware_extra":{"a":[1,2]}}"#).unwrap();
        assert_eq!(response.kind(), ResponseKind::Command);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(
            Response::parse("{\"id\":1,\"result\":"),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            Response::parse("not json at all"),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            Response::parse(r#"{"id":"one"}"#),
            Err(Error::MalformedResponse(_))
        ));
    }
}
