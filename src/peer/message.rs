use super::error::PeerError;
use crate::piece::PieceIndexSet;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One-byte message tags. 0-10 form the base piece-exchange protocol;
/// 11-14 are the work-stealing extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Done = 9,
    Stop = 10,
    Desire = 11,
    Steal = 12,
    Work = 13,
    FoundWork = 14,
}

impl TryFrom<u8> for Opcode {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Choke),
            1 => Ok(Opcode::Unchoke),
            2 => Ok(Opcode::Interested),
            3 => Ok(Opcode::NotInterested),
            4 => Ok(Opcode::Have),
            5 => Ok(Opcode::Bitfield),
            6 => Ok(Opcode::Request),
            7 => Ok(Opcode::Piece),
            8 => Ok(Opcode::Cancel),
            9 => Ok(Opcode::Done),
            10 => Ok(Opcode::Stop),
            11 => Ok(Opcode::Desire),
            12 => Ok(Opcode::Steal),
            13 => Ok(Opcode::Work),
            14 => Ok(Opcode::FoundWork),
            _ => Err(PeerError::InvalidOpcode(value)),
        }
    }
}

/// A protocol message, framed on the wire as a big-endian u32 length
/// followed by the opcode byte and fixed-width fields.
#[derive(Debug, Clone)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(PieceIndexSet),
    Request { index: u32 },
    Piece { index: u32, payload: Bytes },
    Cancel { index: u32 },
    Done,
    Stop,
    /// Exact set of wanted indices (work-stealing extension).
    Desire(PieceIndexSet),
    /// Request to steal a share of the receiver's remaining work; carries
    /// the sender's pieces-received counter when booty balancing is on.
    Steal { pieces_received: Option<u32> },
    /// Stolen work handed to the thief; an empty set is a refusal.
    Work(PieceIndexSet),
    /// The sender acquired fresh work and is a steal target again.
    FoundWork,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Choke => Opcode::Choke,
            Message::Unchoke => Opcode::Unchoke,
            Message::Interested => Opcode::Interested,
            Message::NotInterested => Opcode::NotInterested,
            Message::Have { .. } => Opcode::Have,
            Message::Bitfield(_) => Opcode::Bitfield,
            Message::Request { .. } => Opcode::Request,
            Message::Piece { .. } => Opcode::Piece,
            Message::Cancel { .. } => Opcode::Cancel,
            Message::Done => Opcode::Done,
            Message::Stop => Opcode::Stop,
            Message::Desire(_) => Opcode::Desire,
            Message::Steal { .. } => Opcode::Steal,
            Message::Work(_) => Opcode::Work,
            Message::FoundWork => Opcode::FoundWork,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::Done
            | Message::Stop
            | Message::FoundWork => {
                buf.put_u32(1);
                buf.put_u8(self.opcode() as u8);
            }
            Message::Have { index } | Message::Request { index } | Message::Cancel { index } => {
                buf.put_u32(5);
                buf.put_u8(self.opcode() as u8);
                buf.put_u32(*index);
            }
            Message::Bitfield(set) | Message::Desire(set) | Message::Work(set) => {
                buf.put_u32(1 + set.wire_len() as u32);
                buf.put_u8(self.opcode() as u8);
                set.write_to(&mut buf);
            }
            Message::Piece { index, payload } => {
                buf.put_u32(5 + payload.len() as u32);
                buf.put_u8(Opcode::Piece as u8);
                buf.put_u32(*index);
                buf.put_slice(payload);
            }
            Message::Steal { pieces_received } => match pieces_received {
                Some(count) => {
                    buf.put_u32(6);
                    buf.put_u8(Opcode::Steal as u8);
                    buf.put_u8(1);
                    buf.put_u32(*count);
                }
                None => {
                    buf.put_u32(2);
                    buf.put_u8(Opcode::Steal as u8);
                    buf.put_u8(0);
                }
            },
        }

        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;
        if length == 0 || data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let opcode = Opcode::try_from(data.get_u8())?;

        match opcode {
            Opcode::Choke => Ok(Message::Choke),
            Opcode::Unchoke => Ok(Message::Unchoke),
            Opcode::Interested => Ok(Message::Interested),
            Opcode::NotInterested => Ok(Message::NotInterested),
            Opcode::Done => Ok(Message::Done),
            Opcode::Stop => Ok(Message::Stop),
            Opcode::FoundWork => Ok(Message::FoundWork),
            Opcode::Have => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("have too short".into()));
                }
                Ok(Message::Have {
                    index: data.get_u32(),
                })
            }
            Opcode::Request => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("request too short".into()));
                }
                Ok(Message::Request {
                    index: data.get_u32(),
                })
            }
            Opcode::Cancel => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("cancel too short".into()));
                }
                Ok(Message::Cancel {
                    index: data.get_u32(),
                })
            }
            Opcode::Bitfield => {
                let set = PieceIndexSet::read_from(&mut data)
                    .ok_or_else(|| PeerError::InvalidMessage("bitfield too short".into()))?;
                Ok(Message::Bitfield(set))
            }
            Opcode::Desire => {
                let set = PieceIndexSet::read_from(&mut data)
                    .ok_or_else(|| PeerError::InvalidMessage("desire too short".into()))?;
                Ok(Message::Desire(set))
            }
            Opcode::Work => {
                let set = PieceIndexSet::read_from(&mut data)
                    .ok_or_else(|| PeerError::InvalidMessage("work too short".into()))?;
                Ok(Message::Work(set))
            }
            Opcode::Piece => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let index = data.get_u32();
                let payload = data.copy_to_bytes(length - 5);
                Ok(Message::Piece { index, payload })
            }
            Opcode::Steal => {
                if data.remaining() < 1 {
                    return Err(PeerError::InvalidMessage("steal too short".into()));
                }
                let pieces_received = match data.get_u8() {
                    0 => None,
                    _ => {
                        if data.remaining() < 4 {
                            return Err(PeerError::InvalidMessage("steal too short".into()));
                        }
                        Some(data.get_u32())
                    }
                };
                Ok(Message::Steal { pieces_received })
            }
        }
    }
}
