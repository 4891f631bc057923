//! Command-specific request payload layouts (C4).
//!
//! Each variant borrows its data directly from the packet payload
//! slice handed to [`Request::decode`]; there is no interior-pointer
//! "assign" step the way the original C API needed one, since the
//! borrow checker ties the lifetime for us.

use crate::protocol::TransferFlags;
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    /// The `flags` byte has a bit set outside `TransferFlags`' defined
    /// bits. spec.md §3: "Unused flag bits MUST be zero."
    ReservedFlagBits,
}

/// A decoded `GET_INFO` or `SPI_TRANSFER` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    GetInfo,
    SpiTransfer(SpiTransferRequest<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTransferRequest<'a> {
    pub flags: TransferFlags,
    pub tx_skip: u16,
    pub rx_skip: u16,
    pub rx_size: u16,
    pub tx_data: &'a [u8],
}

impl<'a> SpiTransferRequest<'a> {
    pub fn has_tx(&self) -> bool {
        self.flags.contains(TransferFlags::HAS_TX)
    }

    pub fn has_rx(&self) -> bool {
        self.flags.contains(TransferFlags::HAS_RX)
    }

    pub fn keep_cs(&self) -> bool {
        self.flags.contains(TransferFlags::KEEP_CS)
    }

    /// Number of payload bytes this request occupies once encoded.
    pub fn encoded_size(&self) -> usize {
        1 + varint::encoded_len(self.tx_skip)
            + varint::encoded_len(self.tx_data.len() as u16)
            + varint::encoded_len(self.rx_skip)
            + varint::encoded_len(self.rx_size)
            + self.tx_data.len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, DecodeError> {
        let needed = self.encoded_size();
        if out.len() < needed {
            return Err(DecodeError::Truncated);
        }

        let mut pos = 0;
        out[pos] = self.flags.bits();
        pos += 1;

        pos += encode_varint(self.tx_skip, &mut out[pos..]);
        pos += encode_varint(self.tx_data.len() as u16, &mut out[pos..]);
        pos += encode_varint(self.rx_skip, &mut out[pos..]);
        pos += encode_varint(self.rx_size, &mut out[pos..]);

        out[pos..pos + self.tx_data.len()].copy_from_slice(self.tx_data);
        pos += self.tx_data.len();

        Ok(pos)
    }

    fn decode(payload: &'a [u8]) -> Result<Self, DecodeError> {
        let mut cur = payload;

        let flags_byte = take_byte(&mut cur)?;
        let flags = TransferFlags::from_bits(flags_byte).ok_or(DecodeError::ReservedFlagBits)?;

        let tx_skip = take_varint(&mut cur)?;
        let tx_size = take_varint(&mut cur)?;
        let rx_skip = take_varint(&mut cur)?;
        let rx_size = take_varint(&mut cur)?;

        if cur.len() < tx_size as usize {
            return Err(DecodeError::Truncated);
        }
        let (tx_data, _) = cur.split_at(tx_size as usize);

        Ok(SpiTransferRequest {
            flags,
            tx_skip,
            rx_skip,
            rx_size,
            tx_data,
        })
    }
}

impl<'a> Request<'a> {
    /// Parses a request payload, given the command code already
    /// recovered from the packet's code field.
    pub fn decode(code: crate::protocol::Command, payload: &'a [u8]) -> Result<Self, DecodeError> {
        match code {
            crate::protocol::Command::GetInfo => Ok(Request::GetInfo),
            crate::protocol::Command::SpiTransfer => {
                Ok(Request::SpiTransfer(SpiTransferRequest::decode(payload)?))
            }
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Request::GetInfo => 0,
            Request::SpiTransfer(req) => req.encoded_size(),
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, DecodeError> {
        match self {
            Request::GetInfo => Ok(0),
            Request::SpiTransfer(req) => req.encode(out),
        }
    }
}

fn take_byte(cur: &mut &[u8]) -> Result<u8, DecodeError> {
    let (&b, rest) = cur.split_first().ok_or(DecodeError::Truncated)?;
    *cur = rest;
    Ok(b)
}

fn take_varint(cur: &mut &[u8]) -> Result<u16, DecodeError> {
    let first = *cur.first().ok_or(DecodeError::Truncated)?;
    let width = varint::probe(first);
    if cur.len() < width {
        return Err(DecodeError::Truncated);
    }
    let value = if width == 1 {
        varint::decode1(cur[0])
    } else {
        varint::decode2([cur[0], cur[1]])
    };
    *cur = &cur[width..];
    Ok(value)
}

fn encode_varint(val: u16, out: &mut [u8]) -> usize {
    let mut buf = [0u8; 2];
    let len = varint::encode(val, &mut buf);
    out[..len].copy_from_slice(&buf[..len]);
    len
}
