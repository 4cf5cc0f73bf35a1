//! Tuya LAN protocol, version 3.3
//!
//! Frame layout (all integers big endian):
//!
//! ```text
//! 000055AA | seq | command | length | [return code] | payload | crc32 | 0000AA55
//! ```
//!
//! `length` counts everything after itself. Frames sent by a device carry a
//! 4 byte return code before the payload. Payloads are AES-128-ECB encrypted
//! with the device's local key (PKCS#7 padded); every command except
//! `DP_QUERY` has a `3.3` version header in front of the ciphertext.

use aes::cipher::BlockDecrypt;
use aes::cipher::BlockEncrypt;
use aes::cipher::KeyInit;
use aes::Aes128;
use aes::Block;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::error::VendorError;

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;
pub const PORT: u16 = 6668;

const HEADER_LEN: usize = 16;
const VERSION_HEADER: &[u8; 15] = b"3.3\0\0\0\0\0\0\0\0\0\0\0\0";

/// Largest frame we are willing to buffer
const MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Control = 0x07,
    Status = 0x08,
    DpQuery = 0x0a,
}

impl Command {
    fn needs_version_header(self) -> bool {
        self != Command::DpQuery
    }
}

/// AES-128-ECB keyed with a device's local key
pub struct Cipher(Aes128);

impl Cipher {
    pub fn new(local_key: &str) -> Result<Self, VendorError> {
        Aes128::new_from_slice(local_key.as_bytes())
            .map(Self)
            .map_err(|_| {
                VendorError::Protocol(format!(
                    "local key must be 16 bytes, got {}",
                    local_key.len()
                ))
            })
    }

    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let pad = 16 - plain.len() % 16;
        let mut data = Vec::with_capacity(plain.len() + pad);
        data.extend_from_slice(plain);
        data.resize(plain.len() + pad, pad as u8);

        for chunk in data.chunks_exact_mut(16) {
            let block = Block::from_mut_slice(chunk);
            self.0.encrypt_block(block);
        }
        data
    }

    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, VendorError> {
        if cipher.is_empty() || cipher.len() % 16 != 0 {
            return Err(VendorError::Protocol(format!(
                "ciphertext length {} is not a multiple of 16",
                cipher.len()
            )));
        }

        let mut data = cipher.to_vec();
        for chunk in data.chunks_exact_mut(16) {
            let block = Block::from_mut_slice(chunk);
            self.0.decrypt_block(block);
        }

        let pad = data.last().copied().unwrap_or(0) as usize;
        if pad == 0 || pad > 16 || data[data.len() - pad..].iter().any(|&b| b as usize != pad) {
            return Err(VendorError::Protocol("bad padding (wrong local key?)".to_string()));
        }
        data.truncate(data.len() - pad);
        Ok(data)
    }
}

/// Build a request frame around a JSON payload
pub fn encode(cipher: &Cipher, seq: u32, command: Command, json: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    if command.needs_version_header() {
        payload.extend_from_slice(VERSION_HEADER);
    }
    payload.extend_from_slice(&cipher.encrypt(json));

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 8);
    frame.extend_from_slice(&PREFIX.to_be_bytes());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&(command as u32).to_be_bytes());
    frame.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&SUFFIX.to_be_bytes());
    frame
}

/// A frame received from a device, payload already decrypted
#[derive(Debug, PartialEq)]
pub struct Reply {
    pub seq: u32,
    pub command: u32,
    pub return_code: u32,
    pub payload: Vec<u8>,
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(word)
}

/// Parse and decrypt a complete frame sent by a device
pub fn decode(cipher: &Cipher, frame: &[u8]) -> Result<Reply, VendorError> {
    if frame.len() < HEADER_LEN + 12 {
        return Err(VendorError::Protocol(format!("short frame ({} bytes)", frame.len())));
    }
    if be_u32(frame, 0) != PREFIX {
        return Err(VendorError::Protocol("bad frame prefix".to_string()));
    }
    if be_u32(frame, frame.len() - 4) != SUFFIX {
        return Err(VendorError::Protocol("bad frame suffix".to_string()));
    }

    let crc_at = frame.len() - 8;
    let crc = be_u32(frame, crc_at);
    if crc != crc32fast::hash(&frame[..crc_at]) {
        return Err(VendorError::Protocol("frame CRC mismatch".to_string()));
    }

    let seq = be_u32(frame, 4);
    let command = be_u32(frame, 8);
    let return_code = be_u32(frame, HEADER_LEN);

    let mut body = &frame[HEADER_LEN + 4..crc_at];
    if body.starts_with(&VERSION_HEADER[..3]) {
        body = &body[VERSION_HEADER.len().min(body.len())..];
    }

    let payload = if body.is_empty() {
        Vec::new()
    } else if body.len() % 16 == 0 {
        cipher.decrypt(body)?
    } else {
        // Devices answer some errors in plain text
        body.to_vec()
    };

    Ok(Reply {
        seq,
        command,
        return_code,
        payload,
    })
}

/// Read one whole frame from a stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, VendorError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    if be_u32(&header, 0) != PREFIX {
        return Err(VendorError::Protocol("bad frame prefix".to_string()));
    }

    let len = be_u32(&header, 12) as usize;
    if len < 8 || len > MAX_FRAME_LEN {
        return Err(VendorError::Protocol(format!("bad frame length {}", len)));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + len, 0);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(frame)
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;

    pub(in crate::adapters::tuya) const KEY: &str = "0123456789abcdef";

    /// Build a frame the way a device would: with a return code, and a
    /// version header on everything but DP_QUERY answers.
    pub(in crate::adapters::tuya) fn device_frame(
        cipher: &Cipher,
        seq: u32,
        command: Command,
        json: &[u8],
    ) -> Vec<u8> {
        let mut payload = 0u32.to_be_bytes().to_vec();
        if !json.is_empty() {
            if command.needs_version_header() {
                payload.extend_from_slice(VERSION_HEADER);
            }
            payload.extend_from_slice(&cipher.encrypt(json));
        }

        let mut frame = Vec::new();
        frame.extend_from_slice(&PREFIX.to_be_bytes());
        frame.extend_from_slice(&seq.to_be_bytes());
        frame.extend_from_slice(&(command as u32).to_be_bytes());
        frame.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(&SUFFIX.to_be_bytes());
        frame
    }

    #[test]
    fn test_key_length_checked() {
        assert!(Cipher::new(KEY).is_ok());
        assert!(matches!(
            Cipher::new("short"),
            Err(VendorError::Protocol(_))
        ));
    }

    #[test]
    fn test_padding_is_full_block_when_aligned() {
        let cipher = Cipher::new(KEY).unwrap();
        assert_eq!(cipher.encrypt(&[0u8; 16]).len(), 32);
        assert_eq!(cipher.encrypt(b"{}").len(), 16);
    }

    #[test]
    fn test_wrong_key_fails_padding_check() {
        let cipher = Cipher::new(KEY).unwrap();
        let other = Cipher::new("fedcba9876543210").unwrap();
        let data = cipher.encrypt(br#"{"dps":{"20":true}}"#);
        // Wrong key almost always yields invalid padding
        let decrypted = other.decrypt(&data);
        assert!(decrypted.is_err() || decrypted.unwrap() != br#"{"dps":{"20":true}}"#);
    }

    #[test]
    fn test_control_frame_layout() {
        let cipher = Cipher::new(KEY).unwrap();
        let frame = encode(&cipher, 7, Command::Control, br#"{"dps":{"20":false}}"#);

        assert_eq!(be_u32(&frame, 0), PREFIX);
        assert_eq!(be_u32(&frame, 4), 7);
        assert_eq!(be_u32(&frame, 8), 0x07);
        assert_eq!(be_u32(&frame, 12) as usize, frame.len() - HEADER_LEN);
        assert_eq!(&frame[16..19], b"3.3");
        assert_eq!(be_u32(&frame, frame.len() - 4), SUFFIX);

        let crc_at = frame.len() - 8;
        assert_eq!(be_u32(&frame, crc_at), crc32fast::hash(&frame[..crc_at]));
    }

    #[test]
    fn test_query_frame_has_no_version_header() {
        let cipher = Cipher::new(KEY).unwrap();
        let frame = encode(&cipher, 1, Command::DpQuery, b"{}");
        // header + one encrypted block + crc + suffix
        assert_eq!(frame.len(), 16 + 16 + 8);
        assert_ne!(&frame[16..19], b"3.3");
    }

    #[test]
    fn test_decode_device_reply() {
        let cipher = Cipher::new(KEY).unwrap();
        let json = br#"{"devId":"abc","dps":{"20":true,"22":500}}"#;
        let frame = device_frame(&cipher, 3, Command::Status, json);

        let reply = decode(&cipher, &frame).unwrap();
        assert_eq!(reply.seq, 3);
        assert_eq!(reply.command, Command::Status as u32);
        assert_eq!(reply.return_code, 0);
        assert_eq!(reply.payload, json.to_vec());
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let cipher = Cipher::new(KEY).unwrap();
        let mut frame = device_frame(&cipher, 3, Command::DpQuery, br#"{"dps":{}}"#);
        frame[20] ^= 0xff;
        assert!(matches!(
            decode(&cipher, &frame),
            Err(VendorError::Protocol(msg)) if msg.contains("CRC")
        ));

        frame[0] = 0x12;
        assert!(matches!(
            decode(&cipher, &frame),
            Err(VendorError::Protocol(msg)) if msg.contains("prefix")
        ));
    }

    #[test]
    fn test_empty_ack_decodes() {
        let cipher = Cipher::new(KEY).unwrap();
        let frame = device_frame(&cipher, 9, Command::Control, b"");
        let reply = decode(&cipher, &frame).unwrap();
        assert!(reply.payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let cipher = Cipher::new(KEY).unwrap();
        let first = device_frame(&cipher, 1, Command::Control, b"");
        let second = device_frame(&cipher, 2, Command::Status, br#"{"dps":{}}"#);

        let mut bytes = first.clone();
        bytes.extend_from_slice(&second);
        let mut reader = bytes.as_slice();

        assert_eq!(read_frame(&mut reader).await.unwrap(), first);
        assert_eq!(read_frame(&mut reader).await.unwrap(), second);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(VendorError::Io(_))
        ));
    }
}
