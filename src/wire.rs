//! Wire message codec (spec §6).
//!
//! All multi-byte fields are big-endian. Every message shares a fixed header;
//! GET/PUT/RESULT additionally carry a path bloom filter, and PUT/RESULT
//! carry an opaque payload. DISCOVERY replaces the `key` field with a
//! `space_available` count followed by a run of peer ids.
//!
//! The bloom field's length is not fixed by the wire format: it is
//! `Config::bloom_size` bytes, agreed on out of band (every peer in a
//! deployment runs the same config). `encode` writes whatever length the
//! caller put in `bloom_bytes`; `decode` is told that length explicitly
//! rather than assuming a constant, so a non-default `bloom_size` never
//! silently desyncs the codec from the configured path bloom filter.

use crate::bloom::PathBloom;
use crate::error::WireError;
use crate::id::{Key, PeerId, ID_BYTES};

const HEADER_LEN: usize = 16;
const KEY_LEN: usize = ID_BYTES;

/// Wire-level message type tags (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Get = 1,
    Put = 2,
    Result = 3,
    Discovery = 4,
    AskHello = 5,
}

impl MessageType {
    fn from_u16(v: u16) -> Result<Self, WireError> {
        match v {
            1 => Ok(Self::Get),
            2 => Ok(Self::Put),
            3 => Ok(Self::Result),
            4 => Ok(Self::Discovery),
            5 => Ok(Self::AskHello),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// A decoded wire message, shaped according to its [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Get {
        content_type: u32,
        hop_count: u32,
        network_size_hint: u32,
        key: Key,
        bloom_bytes: Vec<u8>,
    },
    Put {
        content_type: u32,
        hop_count: u32,
        network_size_hint: u32,
        key: Key,
        bloom_bytes: Vec<u8>,
        payload: Vec<u8>,
    },
    Result {
        content_type: u32,
        hop_count: u32,
        network_size_hint: u32,
        key: Key,
        bloom_bytes: Vec<u8>,
        payload: Vec<u8>,
    },
    Discovery {
        content_type: u32,
        hop_count: u32,
        network_size_hint: u32,
        space_available: u32,
        peers: Vec<PeerId>,
    },
    AskHello {
        content_type: u32,
        hop_count: u32,
        network_size_hint: u32,
        peer: PeerId,
    },
}

impl Message {
    /// Construct the bloom filter carried by a GET/PUT/RESULT message.
    /// Returns `None` for message kinds that have no bloom field.
    #[must_use]
    pub fn bloom(&self, k: u32) -> Option<PathBloom> {
        match self {
            Message::Get { bloom_bytes, .. }
            | Message::Put { bloom_bytes, .. }
            | Message::Result { bloom_bytes, .. } => Some(PathBloom::from_bytes(bloom_bytes, k)),
            Message::Discovery { .. } | Message::AskHello { .. } => None,
        }
    }

    fn msg_type(&self) -> MessageType {
        match self {
            Message::Get { .. } => MessageType::Get,
            Message::Put { .. } => MessageType::Put,
            Message::Result { .. } => MessageType::Result,
            Message::Discovery { .. } => MessageType::Discovery,
            Message::AskHello { .. } => MessageType::AskHello,
        }
    }

    /// Serialize this message to its wire byte layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let (content_type, hop_count, network_size_hint) = match self {
            Message::Get {
                content_type,
                hop_count,
                network_size_hint,
                ..
            }
            | Message::Put {
                content_type,
                hop_count,
                network_size_hint,
                ..
            }
            | Message::Result {
                content_type,
                hop_count,
                network_size_hint,
                ..
            }
            | Message::Discovery {
                content_type,
                hop_count,
                network_size_hint,
                ..
            }
            | Message::AskHello {
                content_type,
                hop_count,
                network_size_hint,
                ..
            } => (*content_type, *hop_count, *network_size_hint),
        };
        body.extend_from_slice(&content_type.to_be_bytes());
        body.extend_from_slice(&hop_count.to_be_bytes());
        body.extend_from_slice(&network_size_hint.to_be_bytes());

        match self {
            Message::Get {
                key, bloom_bytes, ..
            } => {
                body.extend_from_slice(key.as_bytes());
                body.extend_from_slice(bloom_bytes);
            }
            Message::Put {
                key,
                bloom_bytes,
                payload,
                ..
            }
            | Message::Result {
                key,
                bloom_bytes,
                payload,
                ..
            } => {
                body.extend_from_slice(key.as_bytes());
                body.extend_from_slice(bloom_bytes);
                body.extend_from_slice(payload);
            }
            Message::Discovery {
                space_available,
                peers,
                ..
            } => {
                body.extend_from_slice(&space_available.to_be_bytes());
                for p in peers {
                    body.extend_from_slice(p.as_bytes());
                }
            }
            Message::AskHello { peer, .. } => {
                body.extend_from_slice(peer.as_bytes());
            }
        }

        let total_len = HEADER_LEN + body.len();
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u16).to_be_bytes());
        out.extend_from_slice(&(self.msg_type() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parse a message from its wire byte layout, validating the declared
    /// size field and any type-specific bounds (spec §4.2). `bloom_size` must
    /// match the sender's `Config::bloom_size` — GET/PUT/RESULT's bloom
    /// field has no self-describing length on the wire.
    pub fn decode(bytes: &[u8], adv_cap: usize, bloom_size: usize) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::TooShort);
        }
        let declared = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        if declared != bytes.len() {
            return Err(WireError::SizeMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        let msg_type = MessageType::from_u16(u16::from_be_bytes([bytes[2], bytes[3]]))?;
        let content_type = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let hop_count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let network_size_hint = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        let rest = &bytes[HEADER_LEN..];

        match msg_type {
            MessageType::Get => {
                if rest.len() < KEY_LEN + bloom_size {
                    return Err(WireError::TooShort);
                }
                let key = Key::from_bytes(rest[..KEY_LEN].try_into().unwrap());
                let bloom_bytes = rest[KEY_LEN..KEY_LEN + bloom_size].to_vec();
                Ok(Message::Get {
                    content_type,
                    hop_count,
                    network_size_hint,
                    key,
                    bloom_bytes,
                })
            }
            MessageType::Put | MessageType::Result => {
                if rest.len() < KEY_LEN + bloom_size {
                    return Err(WireError::TooShort);
                }
                let key = Key::from_bytes(rest[..KEY_LEN].try_into().unwrap());
                let bloom_bytes = rest[KEY_LEN..KEY_LEN + bloom_size].to_vec();
                let payload = rest[KEY_LEN + bloom_size..].to_vec();
                if matches!(msg_type, MessageType::Put) {
                    Ok(Message::Put {
                        content_type,
                        hop_count,
                        network_size_hint,
                        key,
                        bloom_bytes,
                        payload,
                    })
                } else {
                    Ok(Message::Result {
                        content_type,
                        hop_count,
                        network_size_hint,
                        key,
                        bloom_bytes,
                        payload,
                    })
                }
            }
            MessageType::Discovery => {
                if rest.len() < 4 {
                    return Err(WireError::TooShort);
                }
                let space_available = u32::from_be_bytes(rest[..4].try_into().unwrap());
                let peer_bytes = &rest[4..];
                if peer_bytes.len() % ID_BYTES != 0 {
                    return Err(WireError::SizeMismatch {
                        declared,
                        actual: bytes.len(),
                    });
                }
                let count = peer_bytes.len() / ID_BYTES;
                let cap = adv_cap * 8;
                if count > cap {
                    return Err(WireError::TooManyPeers { count, cap });
                }
                let peers = peer_bytes
                    .chunks_exact(ID_BYTES)
                    .map(|chunk| PeerId::from_bytes(chunk.try_into().unwrap()))
                    .collect();
                Ok(Message::Discovery {
                    content_type,
                    hop_count,
                    network_size_hint,
                    space_available,
                    peers,
                })
            }
            MessageType::AskHello => {
                if rest.len() != ID_BYTES {
                    return Err(WireError::TooShort);
                }
                let peer = PeerId::from_bytes(rest.try_into().unwrap());
                Ok(Message::AskHello {
                    content_type,
                    hop_count,
                    network_size_hint,
                    peer,
                })
            }
        }
    }
}
