use serde_json::Value;

use crate::{Error, Result};

/// Reserved byte between the command name and its serialized argument.
/// Arguments are JSON (UTF-8), which can never contain 0xFF, so splitting
/// on the first occurrence is unambiguous.
pub const DATA_SEPARATOR: u8 = 0xFF;

/// One command sent from the dashboard to the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub name: String,
    pub data: Option<Value>,
}

impl Request {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data: Some(data),
        }
    }

    /// Frame payload: name bytes, then optionally `0xFF` + JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = self.name.as_bytes().to_vec();
        if let Some(data) = &self.data {
            out.push(DATA_SEPARATOR);
            out.extend(serde_json::to_vec(data)?);
        }
        Ok(out)
    }

    /// Decode a request frame. A malformed argument (bad JSON after the
    /// separator) yields `data = None` rather than failing the command.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (name, data) = match payload.iter().position(|&b| b == DATA_SEPARATOR) {
            Some(pos) => (
                &payload[..pos],
                serde_json::from_slice(&payload[pos + 1..]).ok(),
            ),
            None => (payload, None),
        };
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::Protocol("command name is not valid UTF-8".into()))?;
        Ok(Self {
            name: name.to_string(),
            data,
        })
    }
}

/// Response status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Failed = 0x02,
}

impl Status {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::NotFound),
            0x02 => Some(Status::Failed),
            _ => None,
        }
    }
}

/// One response from the target. Exactly one per request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub payload: Option<Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            payload: None,
        }
    }

    pub fn ok_with(payload: Value) -> Self {
        Self {
            status: Status::Ok,
            payload: Some(payload),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Status::Failed,
            payload: None,
        }
    }

    /// Frame payload: 1 status byte, then optionally JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.status as u8];
        if let Some(payload) = &self.payload {
            out.extend(serde_json::to_vec(payload)?);
        }
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let Some((&status, rest)) = payload.split_first() else {
            return Err(Error::Protocol("empty response frame".into()));
        };
        let status = Status::from_byte(status)
            .ok_or_else(|| Error::Protocol(format!("unknown status byte 0x{status:02x}")))?;
        let payload = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(rest).map_err(|e| {
                Error::Protocol(format!("undecodable response payload: {e}"))
            })?)
        };
        Ok(Self { status, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let req = Request::with_data("install", json!({"id": "probe1"}));
        let decoded = Request::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded, req);

        let bare = Request::new("test");
        let decoded = Request::decode(&bare.encode().unwrap()).unwrap();
        assert_eq!(decoded, bare);
    }

    #[test]
    fn test_malformed_data_decodes_as_none() {
        let mut payload = b"threads".to_vec();
        payload.push(DATA_SEPARATOR);
        payload.extend(b"not json");
        let req = Request::decode(&payload).unwrap();
        assert_eq!(req.name, "threads");
        assert_eq!(req.data, None);
    }

    #[test]
    fn test_non_utf8_name_is_protocol_error() {
        assert!(matches!(
            Request::decode(&[0xC0, 0x80]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_response_round_trip() {
        for resp in [
            Response::ok(),
            Response::ok_with(json!([1, 2, 3])),
            Response::not_found(),
            Response::failed(),
        ] {
            let decoded = Response::decode(&resp.encode().unwrap()).unwrap();
            assert_eq!(decoded, resp);
        }
    }

    #[test]
    fn test_status_bytes_are_stable() {
        assert_eq!(Response::ok().encode().unwrap(), vec![0x00]);
        assert_eq!(Response::not_found().encode().unwrap(), vec![0x01]);
        assert_eq!(Response::failed().encode().unwrap(), vec![0x02]);
    }

    #[test]
    fn test_bad_response_is_protocol_error() {
        assert!(matches!(Response::decode(&[]), Err(Error::Protocol(_))));
        assert!(matches!(Response::decode(&[0x7f]), Err(Error::Protocol(_))));
        assert!(matches!(
            Response::decode(b"\x00garbage"),
            Err(Error::Protocol(_))
        ));
    }
}
