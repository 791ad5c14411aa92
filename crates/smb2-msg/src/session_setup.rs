//! SESSION_SETUP and LOGOFF messages.

use modular_bitfield::prelude::*;

use crate::header::{Command, Header};
use crate::Request;

/// Session flags returned in a SESSION_SETUP response.
///
/// Reference: MS-SMB2 2.2.6
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    /// The session was established as guest.
    pub guest: bool,
    /// The session was established as a null (anonymous) session.
    pub null_session: bool,
    /// All traffic on the session must be encrypted.
    pub encrypt_data: bool,
    #[skip]
    __: B13,
}

/// SMB2 SESSION_SETUP Request.
///
/// Carries one leg of the GSS-API security-buffer exchange.
///
/// Reference: MS-SMB2 2.2.5
#[derive(Debug, Clone)]
pub struct SessionSetupRequest {
    pub header: Header,
    /// Binding flags; zero for a fresh session.
    pub flags: u8,
    /// Security mode: signing enabled (0x01) or required (0x02).
    pub security_mode: u8,
    /// Capabilities; only the DFS bit is meaningful here.
    pub capabilities: u32,
    /// Session to resurrect after a reconnect, if any.
    pub previous_session_id: u64,
    /// The GSS-API token for this leg.
    pub security_buffer: Vec<u8>,
}

impl SessionSetupRequest {
    const BODY_FIXED_SIZE: usize = 24;
    const STRUCTURE_SIZE: u16 = 25;

    pub fn new(security_mode: u8, security_buffer: Vec<u8>) -> SessionSetupRequest {
        SessionSetupRequest {
            header: Header::new(Command::SessionSetup),
            flags: 0,
            security_mode,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer,
        }
    }
}

impl Request for SessionSetupRequest {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE + self.security_buffer.len()
    }

    fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        let body = &mut buf[Header::STRUCT_SIZE..];
        body[0..2].copy_from_slice(&Self::STRUCTURE_SIZE.to_le_bytes());
        body[2] = self.flags;
        body[3] = self.security_mode;
        body[4..8].copy_from_slice(&self.capabilities.to_le_bytes());
        body[8..12].copy_from_slice(&0u32.to_le_bytes()); // channel
        let sec_off = (Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE) as u16;
        body[12..14].copy_from_slice(&sec_off.to_le_bytes());
        body[14..16].copy_from_slice(&(self.security_buffer.len() as u16).to_le_bytes());
        body[16..24].copy_from_slice(&self.previous_session_id.to_le_bytes());
        body[24..24 + self.security_buffer.len()].copy_from_slice(&self.security_buffer);
    }
}

/// Borrowing view over a SESSION_SETUP response body.
///
/// Reference: MS-SMB2 2.2.6
#[derive(Debug, Clone, Copy)]
pub struct SessionSetupResponseDecoder<'a>(&'a [u8]);

impl<'a> SessionSetupResponseDecoder<'a> {
    const BODY_FIXED_SIZE: usize = 8;
    const STRUCTURE_SIZE: u16 = 9;

    pub fn new(data: &'a [u8]) -> SessionSetupResponseDecoder<'a> {
        SessionSetupResponseDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        if self.0.len() < Self::BODY_FIXED_SIZE || self.u16_at(0) != Self::STRUCTURE_SIZE {
            return true;
        }
        let len = self.u16_at(6) as usize;
        let off = self.u16_at(4) as usize;
        len > 0
            && (off < Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE
                || off - Header::STRUCT_SIZE + len > self.0.len())
    }

    fn u16_at(&self, off: usize) -> u16 {
        u16::from_le_bytes(self.0[off..off + 2].try_into().unwrap())
    }

    pub fn session_flags(&self) -> SessionFlags {
        SessionFlags::from_bytes(self.0[2..4].try_into().unwrap())
    }

    /// The GSS-API token for the next leg (empty once complete).
    pub fn security_buffer(&self) -> &'a [u8] {
        let off = self.u16_at(4) as usize;
        let len = self.u16_at(6) as usize;
        if len == 0 {
            return &[];
        }
        &self.0[off - Header::STRUCT_SIZE..off - Header::STRUCT_SIZE + len]
    }
}

/// SMB2 LOGOFF Request.
///
/// Reference: MS-SMB2 2.2.7
#[derive(Debug, Clone)]
pub struct LogoffRequest {
    pub header: Header,
}

impl Default for LogoffRequest {
    fn default() -> LogoffRequest {
        LogoffRequest {
            header: Header::new(Command::Logoff),
        }
    }
}

impl Request for LogoffRequest {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        Header::STRUCT_SIZE + 4
    }

    fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        buf[Header::STRUCT_SIZE..Header::STRUCT_SIZE + 2].copy_from_slice(&4u16.to_le_bytes());
        buf[Header::STRUCT_SIZE + 2..Header::STRUCT_SIZE + 4]
            .copy_from_slice(&0u16.to_le_bytes());
    }
}
