//! Tuya adapter
//!
//! Bulbs are controlled directly over the LAN with protocol 3.3. Every call
//! opens a fresh TCP connection to the bulb, sends one command and waits for
//! the matching reply; bulbs only accept a single client at a time, so holding
//! connections open would lock out the vendor app.

mod dps;
mod protocol;

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use linkme::distributed_slice;
use serde_json::json;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use self::protocol::Cipher;
use self::protocol::Command;
use self::protocol::Reply;
use super::Adapter;
use super::AdapterContext;
use super::AdapterFactoryResult;
use crate::engine::LightState;
use crate::engine::Rgb;
use crate::error::VendorError;
use crate::registry::Connection;
use crate::registry::Light;
use crate::registry::TuyaConnection;
use crate::registry::Vendor;

/// Frames to read while looking for the reply to our command. Bulbs push
/// unsolicited status frames after a change.
const MAX_FRAMES: usize = 4;

#[derive(Debug, Default)]
pub struct TuyaAdapter {
    seq: AtomicU32,
}

impl TuyaAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn send(
        &self,
        device: &TuyaConnection,
        command: Command,
        payload: Value,
    ) -> Result<Reply, VendorError> {
        let cipher = Cipher::new(&device.local_key)?;
        let mut stream = TcpStream::connect((device.address.as_str(), protocol::PORT)).await?;
        stream.set_nodelay(true)?;
        exchange(&mut stream, &cipher, self.next_seq(), command, &payload).await
    }

    async fn control(&self, light: &Light, dps: Value) -> Result<(), VendorError> {
        let device = device(light)?;
        let payload = json!({
            "devId": device.device_id,
            "uid": device.device_id,
            "t": timestamp(),
            "dps": dps,
        });
        debug!("Tuya control {}: {}", light.id, payload["dps"]);
        self.send(device, Command::Control, payload).await?;
        Ok(())
    }
}

fn device(light: &Light) -> Result<&TuyaConnection, VendorError> {
    match &light.connection {
        Connection::Tuya(device) => Ok(device),
        _ => Err(VendorError::Protocol(format!(
            "light '{}' is not a Tuya light",
            light.id
        ))),
    }
}

fn timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Send one command frame and wait for the reply to it
async fn exchange<S>(
    stream: &mut S,
    cipher: &Cipher,
    seq: u32,
    command: Command,
    payload: &Value,
) -> Result<Reply, VendorError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(payload).map_err(|e| VendorError::Protocol(e.to_string()))?;
    stream
        .write_all(&protocol::encode(cipher, seq, command, &json))
        .await?;
    stream.flush().await?;

    for _ in 0..MAX_FRAMES {
        let frame = protocol::read_frame(stream).await?;
        let reply = protocol::decode(cipher, &frame)?;
        if reply.command == Command::Status as u32 && command != Command::Status {
            debug!("Skipping Tuya status push");
            continue;
        }
        if reply.command != command as u32 {
            debug!("Skipping Tuya frame with command {:#04x}", reply.command);
            continue;
        }

        if reply.return_code != 0 {
            return Err(VendorError::Rejected(format!(
                "device returned code {}: {}",
                reply.return_code,
                String::from_utf8_lossy(&reply.payload)
            )));
        }
        return Ok(reply);
    }

    Err(VendorError::Protocol(format!(
        "no reply to command {:#04x} after {} frames",
        command as u32, MAX_FRAMES
    )))
}

#[async_trait]
impl Adapter for TuyaAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Tuya
    }

    async fn set_brightness(&self, light: &Light, brightness: u8) -> Result<(), VendorError> {
        let layout = device(light)?.layout;
        self.control(light, dps::brightness_command(layout, brightness))
            .await
    }

    async fn set_color(
        &self,
        light: &Light,
        color: Rgb,
        brightness: Option<u8>,
    ) -> Result<(), VendorError> {
        let layout = device(light)?.layout;
        self.control(light, dps::colour_command(layout, color, brightness))
            .await
    }

    async fn status(&self, light: &Light) -> Result<LightState, VendorError> {
        let device = device(light)?;
        let payload = json!({
            "gwId": device.device_id,
            "devId": device.device_id,
            "uid": device.device_id,
            "t": timestamp(),
        });
        let reply = self.send(device, Command::DpQuery, payload).await?;

        let body: Value = serde_json::from_slice(&reply.payload).map_err(|_| {
            VendorError::Protocol(format!(
                "unexpected status reply: {}",
                String::from_utf8_lossy(&reply.payload)
            ))
        })?;
        dps::parse_status(device.layout, &body["dps"])
    }
}

#[distributed_slice(super::REGISTRY)]
fn init_tuya(ctx: &AdapterContext) -> AdapterFactoryResult {
    if !ctx.config.lights.iter().any(|l| l.vendor() == Vendor::Tuya) {
        return Ok(None);
    }
    Ok(Some(Box::new(TuyaAdapter::new())))
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::protocol::tests::device_frame;
    use super::protocol::tests::KEY;
    use super::*;

    /// Fake bulb: reads one request, then writes `replies` in order.
    fn spawn_bulb(
        mut stream: DuplexStream,
        replies: Vec<(Command, u32, Vec<u8>)>,
    ) -> tokio::task::JoinHandle<Reply> {
        tokio::spawn(async move {
            let cipher = Cipher::new(KEY).unwrap();
            let frame = protocol::read_frame(&mut stream).await.unwrap();
            let request = decode_request(&cipher, &frame);

            for (command, code, json) in replies {
                let mut reply = device_frame(&cipher, request.seq, command, &json);
                if code != 0 {
                    reply[16..20].copy_from_slice(&code.to_be_bytes());
                    let crc_at = reply.len() - 8;
                    let crc = crc32fast::hash(&reply[..crc_at]);
                    reply[crc_at..crc_at + 4].copy_from_slice(&crc.to_be_bytes());
                }
                stream.write_all(&reply).await.unwrap();
            }
            request
        })
    }

    /// Requests carry no return code; splice one in so `decode` applies.
    fn decode_request(cipher: &Cipher, frame: &[u8]) -> Reply {
        let mut with_code = frame[..16].to_vec();
        with_code.extend_from_slice(&0u32.to_be_bytes());
        with_code.extend_from_slice(&frame[16..]);
        let len = (with_code.len() - 16) as u32;
        with_code[12..16].copy_from_slice(&len.to_be_bytes());
        let crc_at = with_code.len() - 8;
        let crc = crc32fast::hash(&with_code[..crc_at]);
        with_code[crc_at..crc_at + 4].copy_from_slice(&crc.to_be_bytes());
        protocol::decode(cipher, &with_code).unwrap()
    }

    #[tokio::test]
    async fn test_control_waits_for_matching_reply() {
        let (mut client, bulb) = tokio::io::duplex(8192);
        let handle = spawn_bulb(
            bulb,
            vec![
                (Command::Status, 0, br#"{"dps":{"20":true}}"#.to_vec()),
                (Command::Control, 0, Vec::new()),
            ],
        );

        let cipher = Cipher::new(KEY).unwrap();
        let payload = json!({"devId": "bf01", "dps": {"20": true}});
        let reply = exchange(&mut client, &cipher, 5, Command::Control, &payload)
            .await
            .unwrap();
        assert_eq!(reply.command, Command::Control as u32);

        let request = handle.await.unwrap();
        assert_eq!(request.seq, 5);
        assert_eq!(request.command, Command::Control as u32);
        let sent: Value = serde_json::from_slice(&request.payload).unwrap();
        assert_eq!(sent, payload);
    }

    #[tokio::test]
    async fn test_nonzero_return_code_is_rejected() {
        let (mut client, bulb) = tokio::io::duplex(8192);
        let _handle = spawn_bulb(
            bulb,
            vec![(Command::DpQuery, 1, b"data format error".to_vec())],
        );

        let cipher = Cipher::new(KEY).unwrap();
        let err = exchange(&mut client, &cipher, 1, Command::DpQuery, &json!({}))
            .await
            .unwrap_err();
        match err {
            VendorError::Rejected(msg) => assert!(msg.contains("code 1")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_unrelated_frames() {
        let (mut client, bulb) = tokio::io::duplex(8192);
        let replies = (0..MAX_FRAMES)
            .map(|_| (Command::Status, 0, br#"{"dps":{}}"#.to_vec()))
            .collect();
        let _handle = spawn_bulb(bulb, replies);

        let cipher = Cipher::new(KEY).unwrap();
        assert!(matches!(
            exchange(&mut client, &cipher, 1, Command::Control, &json!({})).await,
            Err(VendorError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_caseta_light_is_not_a_tuya_device() {
        let light = crate::registry::tests::dimmer("parlor", 2);
        let adapter = TuyaAdapter::new();
        assert!(matches!(
            adapter.set_brightness(&light, 10).await,
            Err(VendorError::Protocol(_))
        ));
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let adapter = TuyaAdapter::new();
        assert_eq!(adapter.next_seq(), 1);
        assert_eq!(adapter.next_seq(), 2);
    }
}
