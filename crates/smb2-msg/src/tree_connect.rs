//! TREE_CONNECT and TREE_DISCONNECT messages.

use modular_bitfield::prelude::*;

use crate::header::{Command, Header};
use crate::Request;

/// Share flags returned in a TREE_CONNECT response.
///
/// Reference: MS-SMB2 2.2.10
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareFlags {
    /// The share is in DFS.
    pub dfs: bool,
    /// The share is a DFS root.
    pub dfs_root: bool,
    #[skip]
    __: B2,
    /// Client-side caching policy.
    pub caching: B2,
    #[skip]
    __: B2,
    pub restrict_exclusive_opens: bool,
    pub force_shared_delete: bool,
    pub allow_namespace_caching: bool,
    pub access_based_directory_enum: bool,
    pub force_levelii_oplock: bool,
    pub enable_hash_v1: bool,
    pub enable_hash_v2: bool,
    /// All traffic through this tree must be encrypted.
    pub encrypt_data: bool,
    #[skip]
    __: B16,
}

/// SMB2 TREE_CONNECT Request.
///
/// Reference: MS-SMB2 2.2.9
#[derive(Debug, Clone)]
pub struct TreeConnectRequest {
    pub header: Header,
    /// Full UNC share path, e.g. `\\server\share`.
    pub path: String,
}

impl TreeConnectRequest {
    const BODY_FIXED_SIZE: usize = 8;
    const STRUCTURE_SIZE: u16 = 9;

    pub fn new(path: &str) -> TreeConnectRequest {
        TreeConnectRequest {
            header: Header::new(Command::TreeConnect),
            path: path.to_string(),
        }
    }

    fn path_byte_len(&self) -> usize {
        2 * self.path.encode_utf16().count()
    }
}

impl Request for TreeConnectRequest {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE + self.path_byte_len()
    }

    fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        let body = &mut buf[Header::STRUCT_SIZE..];
        body[0..2].copy_from_slice(&Self::STRUCTURE_SIZE.to_le_bytes());
        body[2..4].copy_from_slice(&0u16.to_le_bytes());
        let path_off = (Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE) as u16;
        body[4..6].copy_from_slice(&path_off.to_le_bytes());
        body[6..8].copy_from_slice(&(self.path_byte_len() as u16).to_le_bytes());
        let mut off = Self::BODY_FIXED_SIZE;
        for unit in self.path.encode_utf16() {
            body[off..off + 2].copy_from_slice(&unit.to_le_bytes());
            off += 2;
        }
    }
}

/// Borrowing view over a TREE_CONNECT response body.
///
/// Reference: MS-SMB2 2.2.10
#[derive(Debug, Clone, Copy)]
pub struct TreeConnectResponseDecoder<'a>(&'a [u8]);

impl<'a> TreeConnectResponseDecoder<'a> {
    const BODY_FIXED_SIZE: usize = 16;
    const STRUCTURE_SIZE: u16 = 16;

    pub fn new(data: &'a [u8]) -> TreeConnectResponseDecoder<'a> {
        TreeConnectResponseDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        self.0.len() < Self::BODY_FIXED_SIZE
            || u16::from_le_bytes(self.0[0..2].try_into().unwrap()) != Self::STRUCTURE_SIZE
    }

    /// Share type: disk (0x01), pipe (0x02) or print (0x03).
    pub fn share_type(&self) -> u8 {
        self.0[2]
    }

    pub fn share_flags(&self) -> ShareFlags {
        ShareFlags::from_bytes(self.0[4..8].try_into().unwrap())
    }

    pub fn capabilities(&self) -> u32 {
        u32::from_le_bytes(self.0[8..12].try_into().unwrap())
    }

    pub fn maximal_access(&self) -> u32 {
        u32::from_le_bytes(self.0[12..16].try_into().unwrap())
    }
}

/// SMB2 TREE_DISCONNECT Request.
///
/// Reference: MS-SMB2 2.2.11
#[derive(Debug, Clone)]
pub struct TreeDisconnectRequest {
    pub header: Header,
}

impl Default for TreeDisconnectRequest {
    fn default() -> TreeDisconnectRequest {
        TreeDisconnectRequest {
            header: Header::new(Command::TreeDisconnect),
        }
    }
}

impl Request for TreeDisconnectRequest {
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
