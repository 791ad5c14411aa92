//! ECHO request.

use crate::header::{Command, Header};
use crate::Request;

/// SMB2 ECHO Request, a connection liveness probe.
///
/// Reference: MS-SMB2 2.2.28
#[derive(Debug, Clone)]
pub struct EchoRequest {
    pub header: Header,
}

impl Default for EchoRequest {
    fn default() -> EchoRequest {
        EchoRequest {
            header: Header::new(Command::Echo),
        }
    }
}

impl Request for EchoRequest {
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
