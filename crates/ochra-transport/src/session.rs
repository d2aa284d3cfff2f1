//! The session handshake and AES-OFB stream wrapping that sits on top of a
//! QUIC bidirectional stream (§4.4).
//!
//! A session is established in two steps, each under its own deadline:
//!
//! 1. Both sides send a `pubkey` packet carrying their ECDSA public key,
//!    signed by the matching private key. The receiver checks the embedded
//!    key's SHA-1 digest against the packet's claimed source and verifies
//!    the packet's own signature under that same key — the packet is
//!    self-certifying, so no prior trust anchor is needed.
//! 2. Both sides generate a random 32-byte session key and send it in a
//!    `key` packet, signed under the identity just established in step 1.
//!
//! After both exchanges complete, each direction of the stream is wrapped in
//! its own AES-OFB keystream: outbound bytes under the locally generated
//! key, inbound bytes under the key received from the peer. Every packet
//! carried over the wrapped stream still carries its own ECDSA signature;
//! the stream cipher only prevents passive observation, it is not a second
//! authentication layer.

use std::time::Duration;

use ochra_crypto::aes_ofb::{random_session_key, OfbStream};
use ochra_crypto::identity::{PrivateKey, PublicKey};
use ochra_types::identity::NodeId;
use quinn::{RecvStream, SendStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::packet::{Packet, TYPE_KEY, TYPE_PUBKEY};
use crate::{Result, TransportError};

/// Default per-step handshake deadline (§4.4, §9 Open Question resolution —
/// externalized as [`Router`](crate)'s `handshake_timeout` config, 2s default).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest single frame this session will read before giving up. Guards
/// against a peer claiming an absurd length prefix.
const MAX_FRAME_SIZE: usize = 1 << 20;

/// An established, encrypted, authenticated session with one peer.
pub struct Session {
    tx: SendStream,
    rx: RecvStream,
    local_id: NodeId,
    local_key: PrivateKey,
    remote_id: NodeId,
    remote_key: PublicKey,
    outbound: OfbStream,
    inbound: OfbStream,
}

impl Session {
    /// Run the handshake over an already-connected bidirectional stream.
    pub async fn handshake(
        tx: SendStream,
        rx: RecvStream,
        local_id: NodeId,
        local_key: PrivateKey,
        timeout: Duration,
    ) -> Result<Self> {
        let mut tx = tx;
        let mut rx = rx;

        let remote_pubkey_packet =
            exchange_step(&mut tx, &mut rx, local_id, &local_key, TYPE_PUBKEY, {
                let bytes = rmp_serde::to_vec_named(local_key.public_key())
                    .map_err(|e| TransportError::Serialization(e.to_string()))?;
                bytes
            }, timeout)
            .await?;

        let remote_key: PublicKey = rmp_serde::from_slice(&remote_pubkey_packet.payload)
            .map_err(|e| TransportError::Deserialization(e.to_string()))?;
        if remote_key.digest() != remote_pubkey_packet.src.digest {
            return Err(TransportError::ProtocolViolation(
                "pubkey packet source does not match embedded key digest".to_string(),
            ));
        }
        if !remote_pubkey_packet.verify(&remote_key) {
            return Err(TransportError::SignatureVerification);
        }
        let remote_id = remote_pubkey_packet.src;

        let local_session_key = random_session_key();
        let remote_key_packet = exchange_step(
            &mut tx,
            &mut rx,
            local_id,
            &local_key,
            TYPE_KEY,
            local_session_key.to_vec(),
            timeout,
        )
        .await?;

        if remote_key_packet.src != remote_id {
            return Err(TransportError::ProtocolViolation(
                "key packet source does not match pubkey packet source".to_string(),
            ));
        }
        if !remote_key_packet.verify(&remote_key) {
            return Err(TransportError::SignatureVerification);
        }
        if remote_key_packet.payload.len() != 32 {
            return Err(TransportError::ProtocolViolation(
                "session key must be 32 bytes".to_string(),
            ));
        }
        let mut remote_session_key = [0u8; 32];
        remote_session_key.copy_from_slice(&remote_key_packet.payload);

        Ok(Self {
            tx,
            rx,
            local_id,
            local_key,
            remote_id,
            remote_key,
            outbound: OfbStream::new(&local_session_key),
            inbound: OfbStream::new(&remote_session_key),
        })
    }

    pub fn remote_id(&self) -> NodeId {
        self.remote_id
    }

    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_key
    }

    /// Sign `payload` under the local identity and send it, encrypted.
    pub async fn send(&mut self, kind: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        let packet = Packet::sign(
            self.remote_id,
            self.local_id,
            kind,
            payload,
            &self.local_key,
        )?;
        let encoded = packet.encode()?;
        self.write_frame(&encoded).await
    }

    /// Receive and decrypt the next packet, verifying it against the
    /// session's pinned remote public key.
    pub async fn recv(&mut self) -> Result<Packet> {
        let bytes = self.read_frame().await?;
        let packet = Packet::decode(&bytes)?;
        if packet.src != self.remote_id {
            return Err(TransportError::ProtocolViolation(
                "packet source does not match session peer".to_string(),
            ));
        }
        if !packet.verify(&self.remote_key) {
            return Err(TransportError::SignatureVerification);
        }
        Ok(packet)
    }

    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| TransportError::InvalidPacket("frame too large".to_string()))?;
        let mut len_buf = len.to_le_bytes();
        self.outbound.apply(&mut len_buf);
        self.tx
            .write_all(&len_buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let mut body = data.to_vec();
        self.outbound.apply(&mut body);
        self.tx
            .write_all(&body)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.rx
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.inbound.apply(&mut len_buf);
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::InvalidPacket(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_SIZE}"
            )));
        }

        let mut body = vec![0u8; len];
        self.rx
            .read_exact(&mut body)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.inbound.apply(&mut body);
        Ok(body)
    }
}

/// Send one handshake packet and read the peer's matching packet back,
/// both bound by `timeout`. Handshake packets address themselves (`dst ==
/// src`) since the peer's identity is not yet confirmed when they are sent.
async fn exchange_step(
    tx: &mut SendStream,
    rx: &mut RecvStream,
    local_id: NodeId,
    local_key: &PrivateKey,
    kind: &str,
    payload: Vec<u8>,
    timeout: Duration,
) -> Result<Packet> {
    let packet = Packet::sign(local_id, local_id, kind, payload, local_key)?;
    let encoded = packet.encode()?;

    tokio::time::timeout(timeout, write_plain_frame(tx, &encoded))
        .await
        .map_err(|_| TransportError::HandshakeTimeout)??;

    let bytes = tokio::time::timeout(timeout, read_plain_frame(rx))
        .await
        .map_err(|_| TransportError::HandshakeTimeout)??;

    let remote_packet = Packet::decode(&bytes)?;
    if remote_packet.kind != kind {
        return Err(TransportError::ProtocolViolation(format!(
            "expected {kind} packet during handshake, got {}",
            remote_packet.kind
        )));
    }
    Ok(remote_packet)
}

async fn write_plain_frame(tx: &mut SendStream, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| TransportError::InvalidPacket("frame too large".to_string()))?;
    tx.write_all(&len.to_le_bytes())
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    tx.write_all(data)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))
}

async fn read_plain_frame(rx: &mut RecvStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    rx.read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::InvalidPacket(format!(
            "handshake frame length {len} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }
    let mut buf = vec![0u8; len];
    rx.read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handshake_timeout() {
        assert_eq!(DEFAULT_HANDSHAKE_TIMEOUT, Duration::from_secs(2));
    }

    // Full handshake end-to-end behavior (two real QUIC endpoints performing
    // both exchange steps and then exchanging application packets) is
    // covered by the integration tests in ochra-daemon, which can drive two
    // real loopback `QuicNode`s; a unit test here would need to fake a
    // `SendStream`/`RecvStream` pair, which quinn does not expose.
}
