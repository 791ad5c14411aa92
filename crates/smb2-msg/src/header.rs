//! Plain message header and related types.

use modular_bitfield::prelude::*;

/// SMB2/SMB3 protocol command codes.
///
/// Reference: MS-SMB2 2.2.1.2
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0,
    SessionSetup = 1,
    Logoff = 2,
    TreeConnect = 3,
    TreeDisconnect = 4,
    Create = 5,
    Close = 6,
    Flush = 7,
    Read = 8,
    Write = 9,
    Lock = 0xA,
    Ioctl = 0xB,
    Cancel = 0xC,
    Echo = 0xD,
    QueryDirectory = 0xE,
    ChangeNotify = 0xF,
    QueryInfo = 0x10,
    SetInfo = 0x11,
    OplockBreak = 0x12,
    ServerToClientNotification = 0x13,
}

impl TryFrom<u16> for Command {
    type Error = crate::SmbMsgError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use Command::*;
        Ok(match value {
            0 => Negotiate,
            1 => SessionSetup,
            2 => Logoff,
            3 => TreeConnect,
            4 => TreeDisconnect,
            5 => Create,
            6 => Close,
            7 => Flush,
            8 => Read,
            9 => Write,
            0xA => Lock,
            0xB => Ioctl,
            0xC => Cancel,
            0xD => Echo,
            0xE => QueryDirectory,
            0xF => ChangeNotify,
            0x10 => QueryInfo,
            0x11 => SetInfo,
            0x12 => OplockBreak,
            0x13 => ServerToClientNotification,
            _ => return Err(crate::SmbMsgError::UnknownCommand(value)),
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Negotiate => "Negotiate",
            Command::SessionSetup => "Session Setup",
            Command::Logoff => "Logoff",
            Command::TreeConnect => "Tree Connect",
            Command::TreeDisconnect => "Tree Disconnect",
            Command::Create => "Create",
            Command::Close => "Close",
            Command::Flush => "Flush",
            Command::Read => "Read",
            Command::Write => "Write",
            Command::Lock => "Lock",
            Command::Ioctl => "Ioctl",
            Command::Cancel => "Cancel",
            Command::Echo => "Echo",
            Command::QueryDirectory => "Query Directory",
            Command::ChangeNotify => "Change Notify",
            Command::QueryInfo => "Query Info",
            Command::SetInfo => "Set Info",
            Command::OplockBreak => "Oplock Break",
            Command::ServerToClientNotification => "Server to Client Notification",
        };
        write!(f, "{} ({:#x})", name, *self as u16)
    }
}

/// NT status codes the connection layer inspects.
///
/// Status values travel as raw `u32`; only the handful the client core
/// branches on are named here.
pub mod status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const PENDING: u32 = 0x0000_0103;
    pub const MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const USER_SESSION_DELETED: u32 = 0xC000_0203;
}

/// SMB2 header flags.
///
/// Reference: MS-SMB2 2.2.1.2
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFlags {
    /// Message is a server response.
    pub server_to_redir: bool,
    /// Message is part of an asynchronous operation.
    pub async_command: bool,
    /// Request is a related operation in a compounded chain.
    pub related_operations: bool,
    /// Message is signed.
    pub signed: bool,
    /// Priority mask for quality of service.
    pub priority_mask: B3,
    #[skip]
    __: B21,
    /// Request is a DFS operation.
    pub dfs_operation: bool,
    /// Request is a replay operation for resilient handles.
    pub replay_operation: bool,
    #[skip]
    __: B2,
}

/// SMB2 packet header for outbound messages.
///
/// Common 64-byte header for all SMB2/SMB3 messages, serialized at fixed
/// little-endian offsets.
///
/// Reference: MS-SMB2 2.2.1.1, 2.2.1.2
#[derive(Debug, Clone)]
pub struct Header {
    /// Number of credits charged for this request.
    pub credit_charge: u16,
    /// NT status code (requests leave this zero).
    pub status: u32,
    /// Command code identifying the request/response type.
    pub command: Command,
    /// Number of credits requested or granted.
    pub credit_request: u16,
    /// Header flags indicating message properties.
    pub flags: HeaderFlags,
    /// Offset to the next message in a compounded chain (0 if not compounded).
    pub next_command: u32,
    /// Unique message identifier.
    pub message_id: u64,
    /// Tree identifier (synchronous operations only).
    pub tree_id: u32,
    /// Unique session identifier.
    pub session_id: u64,
    /// Message signature for signed messages.
    pub signature: [u8; 16],
}

impl Header {
    pub const STRUCT_SIZE: usize = 64;
    pub const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];

    /// Byte offset of the flags field within an encoded header.
    pub const FLAGS_OFFSET: usize = 16;
    /// Byte offset of the signature field within an encoded header.
    pub const SIGNATURE_OFFSET: usize = 48;
    pub const SIGNATURE_SIZE: usize = 16;

    /// The `SIGNED` bit within the flags word.
    pub const FLAGS_SIGNED: u32 = 0x0000_0008;

    pub fn new(command: Command) -> Header {
        Header {
            credit_charge: 1,
            status: 0,
            command,
            credit_request: 0,
            flags: HeaderFlags::new(),
            next_command: 0,
            message_id: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    /// Serializes the header into the first 64 bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&Self::PROTOCOL_ID);
        buf[4..6].copy_from_slice(&(Self::STRUCT_SIZE as u16).to_le_bytes());
        buf[6..8].copy_from_slice(&self.credit_charge.to_le_bytes());
        buf[8..12].copy_from_slice(&self.status.to_le_bytes());
        buf[12..14].copy_from_slice(&(self.command as u16).to_le_bytes());
        buf[14..16].copy_from_slice(&self.credit_request.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.into_bytes());
        buf[20..24].copy_from_slice(&self.next_command.to_le_bytes());
        buf[24..32].copy_from_slice(&self.message_id.to_le_bytes());
        buf[32..36].copy_from_slice(&0u32.to_le_bytes());
        buf[36..40].copy_from_slice(&self.tree_id.to_le_bytes());
        buf[40..48].copy_from_slice(&self.session_id.to_le_bytes());
        buf[48..64].copy_from_slice(&self.signature);
    }
}

/// Borrowing view over an encoded plain SMB2 packet.
///
/// Field accessors must only be called when [`PacketCodec::is_invalid`]
/// returned `false`.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec<'a>(&'a [u8]);

impl<'a> PacketCodec<'a> {
    pub fn new(pkt: &'a [u8]) -> PacketCodec<'a> {
        PacketCodec(pkt)
    }

    /// True when the buffer cannot hold a plain SMB2 packet: too short,
    /// wrong protocol id, or structure size mismatch.
    pub fn is_invalid(&self) -> bool {
        self.0.len() < Header::STRUCT_SIZE
            || self.0[0..4] != Header::PROTOCOL_ID
            || self.u16_at(4) != Header::STRUCT_SIZE as u16
    }

    fn u16_at(&self, off: usize) -> u16 {
        u16::from_le_bytes(self.0[off..off + 2].try_into().unwrap())
    }

    fn u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.0[off..off + 4].try_into().unwrap())
    }

    fn u64_at(&self, off: usize) -> u64 {
        u64::from_le_bytes(self.0[off..off + 8].try_into().unwrap())
    }

    pub fn credit_charge(&self) -> u16 {
        self.u16_at(6)
    }

    pub fn status(&self) -> u32 {
        self.u32_at(8)
    }

    pub fn command(&self) -> u16 {
        self.u16_at(12)
    }

    /// Credits granted by the server (responses share the request field).
    pub fn credit_response(&self) -> u16 {
        self.u16_at(14)
    }

    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bytes(self.0[16..20].try_into().unwrap())
    }

    /// Offset to the next chained response; 0 marks the end of the chain.
    pub fn next_command(&self) -> usize {
        self.u32_at(20) as usize
    }

    pub fn message_id(&self) -> u64 {
        self.u64_at(24)
    }

    /// Tree id of a synchronous-form header. Asynchronous headers carry an
    /// AsyncId in these bytes instead; check [`HeaderFlags::async_command`].
    pub fn tree_id(&self) -> u32 {
        self.u32_at(36)
    }

    pub fn async_id(&self) -> u64 {
        self.u64_at(32)
    }

    pub fn session_id(&self) -> u64 {
        self.u64_at(40)
    }

    pub fn signature(&self) -> [u8; 16] {
        self.0[48..64].try_into().unwrap()
    }

    /// The command body following the header.
    pub fn data(&self) -> &'a [u8] {
        &self.0[Header::STRUCT_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Async STATUS_PENDING change-notify response captured off the wire.
    const ASYNC_NOTIFY: &str = "fe534d4240000000030100000f000100130000000000000008000000000000\
                                000800000000000000d72753080000000063f825deae02952fa3d8c8aaf46e7c99";

    #[test]
    fn decode_async_notify_header() {
        let raw = hex::decode(ASYNC_NOTIFY).unwrap();
        let p = PacketCodec::new(&raw);
        assert!(!p.is_invalid());
        assert_eq!(p.credit_charge(), 0);
        assert_eq!(p.status(), status::PENDING);
        assert_eq!(p.command(), Command::ChangeNotify as u16);
        assert_eq!(p.credit_response(), 1);
        let flags = p.flags();
        assert!(flags.server_to_redir());
        assert!(flags.async_command());
        assert!(!flags.signed());
        assert_eq!(flags.priority_mask(), 1);
        assert_eq!(p.next_command(), 0);
        assert_eq!(p.message_id(), 8);
        assert_eq!(p.async_id(), 8);
        assert_eq!(p.session_id(), 0x0853_27d7);
        assert_eq!(
            p.signature()[..4],
            [0x63, 0xf8, 0x25, 0xde],
            "signature bytes are taken verbatim"
        );
        assert!(p.data().is_empty());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut hdr = Header::new(Command::Echo);
        hdr.credit_charge = 2;
        hdr.credit_request = 5;
        hdr.flags.set_signed(true);
        hdr.message_id = 42;
        hdr.tree_id = 7;
        hdr.session_id = 0x1122_3344_5566_7788;
        hdr.signature = [0xAB; 16];

        let mut buf = [0u8; Header::STRUCT_SIZE];
        hdr.encode(&mut buf);

        let p = PacketCodec::new(&buf);
        assert!(!p.is_invalid());
        assert_eq!(p.credit_charge(), 2);
        assert_eq!(p.command(), Command::Echo as u16);
        assert_eq!(p.credit_response(), 5);
        assert!(p.flags().signed());
        assert_eq!(p.message_id(), 42);
        assert_eq!(p.tree_id(), 7);
        assert_eq!(p.session_id(), 0x1122_3344_5566_7788);
        assert_eq!(p.signature(), [0xAB; 16]);
    }

    #[test]
    fn rejects_short_and_foreign_buffers() {
        assert!(PacketCodec::new(&[]).is_invalid());
        assert!(PacketCodec::new(&[0xFE, b'S', b'M']).is_invalid());

        let mut buf = [0u8; Header::STRUCT_SIZE];
        Header::new(Command::Echo).encode(&mut buf);
        buf[0] = 0xFD; // transform magic
        assert!(PacketCodec::new(&buf).is_invalid());

        let mut buf2 = [0u8; Header::STRUCT_SIZE];
        Header::new(Command::Echo).encode(&mut buf2);
        buf2[4] = 63; // bad structure size
        assert!(PacketCodec::new(&buf2).is_invalid());
    }
}
