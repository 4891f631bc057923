//! Command-specific response payload layouts (C4).
//!
//! A failure response carries no payload at all — the packet's code
//! field holds the [`crate::protocol::ErrorCode`] instead, so this
//! module only models the success shapes.

use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    GetInfo(GetInfoResponse),
    SpiTransfer(SpiTransferResponse<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInfoResponse {
    pub version_major: u8,
    pub version_minor: u8,
    pub max_packet_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTransferResponse<'a> {
    pub rx_data: &'a [u8],
}

impl GetInfoResponse {
    pub fn encoded_size(&self) -> usize {
        1 + varint::encoded_len(self.max_packet_size)
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, DecodeError> {
        if out.len() < self.encoded_size() {
            return Err(DecodeError::Truncated);
        }
        out[0] = (self.version_major << 4) | (self.version_minor & 0x0F);
        let mut vbuf = [0u8; 2];
        let vlen = varint::encode(self.max_packet_size, &mut vbuf);
        out[1..1 + vlen].copy_from_slice(&vbuf[..vlen]);
        Ok(1 + vlen)
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let first = *payload.first().ok_or(DecodeError::Truncated)?;
        let rest = &payload[1..];
        let width = varint::probe(*rest.first().ok_or(DecodeError::Truncated)?);
        if rest.len() < width {
            return Err(DecodeError::Truncated);
        }
        let max_packet_size = if width == 1 {
            varint::decode1(rest[0])
        } else {
            varint::decode2([rest[0], rest[1]])
        };
        Ok(GetInfoResponse {
            version_major: first >> 4,
            version_minor: first & 0x0F,
            max_packet_size,
        })
    }
}

impl<'a> SpiTransferResponse<'a> {
    pub fn encoded_size(&self) -> usize {
        varint::encoded_len(self.rx_data.len() as u16) + self.rx_data.len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, DecodeError> {
        if out.len() < self.encoded_size() {
            return Err(DecodeError::Truncated);
        }
        let mut vbuf = [0u8; 2];
        let vlen = varint::encode(self.rx_data.len() as u16, &mut vbuf);
        out[..vlen].copy_from_slice(&vbuf[..vlen]);
        out[vlen..vlen + self.rx_data.len()].copy_from_slice(self.rx_data);
        Ok(vlen + self.rx_data.len())
    }

    fn decode(payload: &'a [u8]) -> Result<Self, DecodeError> {
        let first = *payload.first().ok_or(DecodeError::Truncated)?;
        let width = varint::probe(first);
        if payload.len() < width {
            return Err(DecodeError::Truncated);
        }
        let rx_size = if width == 1 {
            varint::decode1(payload[0])
        } else {
            varint::decode2([payload[0], payload[1]])
        };
        let rest = &payload[width..];
        if rest.len() < rx_size as usize {
            return Err(DecodeError::Truncated);
        }
        Ok(SpiTransferResponse {
            rx_data: &rest[..rx_size as usize],
        })
    }
}

impl<'a> Response<'a> {
    pub fn decode(code: crate::protocol::Command, payload: &'a [u8]) -> Result<Self, DecodeError> {
        match code {
            crate::protocol::Command::GetInfo => {
                Ok(Response::GetInfo(GetInfoResponse::decode(payload)?))
            }
            crate::protocol::Command::SpiTransfer => {
                Ok(Response::SpiTransfer(SpiTransferResponse::decode(payload)?))
            }
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Response::GetInfo(r) => r.encoded_size(),
            Response::SpiTransfer(r) => r.encoded_size(),
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, DecodeError> {
        match self {
            Response::GetInfo(r) => r.encode(out),
            Response::SpiTransfer(r) => r.encode(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn get_info_round_trips() {
        let resp = GetInfoResponse {
            version_major: 1,
            version_minor: 0,
            max_packet_size: 384,
        };
        let mut buf = [0u8; 8];
        let len = resp.encode(&mut buf).unwrap();
        let decoded = Response::decode(Command::GetInfo, &buf[..len]).unwrap();
        assert_eq!(decoded, Response::GetInfo(resp));
    }

    #[test]
    fn spi_transfer_round_trips_with_data() {
        let resp = Response::SpiTransfer(SpiTransferResponse {
            rx_data: &[1, 2, 3],
        });
        let mut buf = [0u8; 8];
        let len = resp.encode(&mut buf).unwrap();
        let decoded = Response::decode(Command::SpiTransfer, &buf[..len]).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn spi_transfer_empty_rx_round_trips() {
        let resp = Response::SpiTransfer(SpiTransferResponse { rx_data: &[] });
        let mut buf = [0u8; 4];
        let len = resp.encode(&mut buf).unwrap();
        let decoded = Response::decode(Command::SpiTransfer, &buf[..len]).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn truncated_get_info_is_rejected() {
        assert_eq!(
            Response::decode(Command::GetInfo, &[0x10]),
            Err(DecodeError::Truncated)
        );
    }
}
