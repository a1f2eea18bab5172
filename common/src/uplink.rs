//! Interpretation of the server's responses, shared by every HTTP transport.

use crate::{endpoints::HTTP_OK, types::DeviceRecord};

const MAX_LOGGED_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("wifi not connected")]
    LinkDown,

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid device config payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl UplinkError {
    pub fn transport(err: impl core::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

pub fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}

/// Parses the device record out of a configuration response. Only HTTP 200
/// is accepted.
pub fn parse_device_config(status: u16, body: &[u8]) -> Result<DeviceRecord, UplinkError> {
    if status != HTTP_OK {
        return Err(UplinkError::HttpStatus {
            status,
            body: body_excerpt(body),
        });
    }

    Ok(serde_json::from_slice(body)?)
}

pub fn interpret_send_response(status: u16, body: &[u8]) -> Result<(), UplinkError> {
    if status == HTTP_OK {
        return Ok(());
    }

    Err(UplinkError::HttpStatus {
        status,
        body: body_excerpt(body),
    })
}

fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_LOGGED_BODY) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::thresholds::ThresholdSet;

    #[test]
    fn well_formed_config_sets_exact_bounds() {
        let body = br#"{"minTemperature":10,"maxTemperature":30,"minHumidity":20,"maxHumidity":80}"#;

        let record = parse_device_config(200, body).unwrap();

        assert_eq!(
            record.thresholds,
            ThresholdSet {
                min_temperature: 10.0,
                max_temperature: 30.0,
                min_humidity: 20.0,
                max_humidity: 80.0,
            }
        );
        assert_eq!(record.device_id, None);
    }

    #[test]
    fn not_found_is_http_status_error() {
        let err = parse_device_config(404, b"IoT Device with id: 9 not found").unwrap_err();

        match err {
            UplinkError::HttpStatus { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "IoT Device with id: 9 not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_config_is_payload_error() {
        assert!(matches!(
            parse_device_config(200, b"{\"minTemperature\": 10,"),
            Err(UplinkError::Payload(_))
        ));
        assert!(matches!(
            parse_device_config(200, br#"{"minTemperature":10,"maxTemperature":30}"#),
            Err(UplinkError::Payload(_))
        ));
    }

    #[test]
    fn only_200_counts_as_sent() {
        assert!(interpret_send_response(200, b"{}").is_ok());

        for status in [201, 204, 400, 401, 500] {
            assert!(matches!(
                interpret_send_response(status, b"nope"),
                Err(UplinkError::HttpStatus { status: s, .. }) if s == status
            ));
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        let err = interpret_send_response(500, body.as_bytes()).unwrap_err();

        let UplinkError::HttpStatus { body, .. } = err else {
            panic!("expected HttpStatus");
        };
        assert_eq!(body.len(), MAX_LOGGED_BODY + 3);
        assert!(body.ends_with("..."));
    }

    #[test]
    fn error_messages_are_readable() {
        assert_eq!(bearer_header("abc"), "Bearer abc");
        assert_eq!(UplinkError::LinkDown.to_string(), "wifi not connected");
        assert_eq!(
            UplinkError::transport("connection refused").to_string(),
            "transport error: connection refused"
        );
    }
}
