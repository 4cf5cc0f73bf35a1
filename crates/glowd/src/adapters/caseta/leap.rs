//! Minimal LEAP client
//!
//! LEAP is the JSON protocol spoken by Lutron Smart Bridges: one JSON object
//! per line, requests tagged with a `ClientTag` that the bridge echoes back on
//! the matching response. The bridge also pushes unsolicited status events on
//! the same stream, which are skipped here.

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufStream;
use tracing::debug;

use crate::error::VendorError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Request<'a> {
    communique_type: &'a str,
    header: RequestHeader<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestHeader<'a> {
    client_tag: &'a str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub communique_type: String,
    pub header: ResponseHeader,
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub client_tag: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Response {
    /// Numeric part of the status code, e.g. 201 for "201 Created"
    pub fn status(&self) -> Option<u16> {
        self.header
            .status_code
            .as_deref()
            .and_then(|s| s.split_whitespace().next())
            .and_then(|code| code.parse().ok())
    }

    fn into_result(self) -> Result<Self, VendorError> {
        let ok = matches!(self.status(), Some(200..=299));
        if ok && self.communique_type != "ExceptionResponse" {
            return Ok(self);
        }

        let message = self
            .body
            .get("Message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        Err(VendorError::Rejected(format!(
            "{} ({})",
            self.header.status_code.as_deref().unwrap_or("no status"),
            message
        )))
    }
}

/// A LEAP session over any byte stream (TLS in production).
pub struct LeapConnection<S> {
    stream: BufStream<S>,
    next_tag: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> LeapConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            next_tag: 1,
        }
    }

    /// Send one request and wait for the response carrying its tag
    pub async fn request(
        &mut self,
        communique_type: &str,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, VendorError> {
        let tag = format!("glowd-{}", self.next_tag);
        self.next_tag += 1;

        let request = Request {
            communique_type,
            header: RequestHeader {
                client_tag: &tag,
                url,
            },
            body,
        };
        let mut line =
            serde_json::to_vec(&request).map_err(|e| VendorError::Protocol(e.to_string()))?;
        line.extend_from_slice(b"\r\n");

        debug!("LEAP {} {} ({})", communique_type, url, tag);
        self.stream.write_all(&line).await?;
        self.stream.flush().await?;

        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stream.read_line(&mut buf).await? == 0 {
                return Err(VendorError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "bridge closed the connection",
                )));
            }

            let line = buf.trim();
            if line.is_empty() {
                continue;
            }

            let response: Response =
                serde_json::from_str(line).map_err(|e| VendorError::Protocol(e.to_string()))?;
            if response.header.client_tag.as_deref() == Some(tag.as_str()) {
                return response.into_result();
            }

            debug!(
                "Skipping unsolicited LEAP {} for {:?}",
                response.communique_type, response.header.url
            );
        }
    }

    /// Move a zone to a level (0-100)
    pub async fn go_to_level(&mut self, zone: u32, level: u8) -> Result<(), VendorError> {
        let url = format!("/zone/{}/commandprocessor", zone);
        let body = json!({
            "Command": {
                "CommandType": "GoToLevel",
                "Parameter": [{"Type": "Level", "Value": level}]
            }
        });
        self.request("CreateRequest", &url, Some(body)).await?;
        Ok(())
    }

    /// Current level (0-100) of a zone
    pub async fn zone_level(&mut self, zone: u32) -> Result<u8, VendorError> {
        let url = format!("/zone/{}/status", zone);
        let response = self.request("ReadRequest", &url, None).await?;

        let level = response
            .body
            .pointer("/ZoneStatus/Level")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| VendorError::Protocol(format!("no ZoneStatus.Level in {}", url)))?;

        Ok(level.round().clamp(0.0, 100.0) as u8)
    }
}
