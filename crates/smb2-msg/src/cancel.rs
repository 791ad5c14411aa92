//! CANCEL request.

use crate::header::{Command, Header};
use crate::Request;

/// SMB2 CANCEL Request.
///
/// Cancels a previously sent message on the same connection. The header's
/// MessageId must be the id of the request being cancelled; the connection
/// layer does not allocate a fresh id or charge credits for it, and no
/// response is expected.
///
/// Reference: MS-SMB2 2.2.30
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub header: Header,
}

impl CancelRequest {
    /// Builds a cancel frame for the in-flight request `message_id`.
    pub fn new(message_id: u64) -> CancelRequest {
        let mut header = Header::new(Command::Cancel);
        header.credit_charge = 0;
        header.message_id = message_id;
        CancelRequest { header }
    }
}

impl Request for CancelRequest {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_reserved_pair() {
        let req = CancelRequest::new(17);
        let mut buf = vec![0u8; req.size()];
        req.encode(&mut buf);
        assert_eq!(hex::encode(&buf[64..]), "04000000");
        assert_eq!(req.header.message_id, 17);
    }
}
