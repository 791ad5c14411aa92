//! The authentication seam.
//!
//! The mechanism-specific state machine (NTLM, Kerberos, ...) lives outside
//! this crate. Session setup drives any [`Authenticator`], wraps its tokens
//! in SPNEGO framing, and takes the session key bundle once the exchange
//! completes.

pub mod spnego;

/// DER-encoded OID of the NTLMSSP mechanism (1.3.6.1.4.1.311.2.2.10).
pub const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

/// One side of a GSS-API style token exchange.
///
/// `next_token` is called once per session-setup leg: first with no input,
/// then with each mechanism token the server returned. Once
/// [`Authenticator::is_complete`] reports true the produced token is sent as
/// the final leg and [`Authenticator::session_key`] must yield the
/// established key material.
pub trait Authenticator: Send {
    /// DER-encoded OID identifying the mechanism in the SPNEGO mech list.
    fn oid(&self) -> &[u8];

    /// Produces the next security token to send.
    fn next_token(&mut self, server_token: Option<&[u8]>) -> crate::Result<Vec<u8>>;

    /// True once the exchange needs no further legs from this side.
    fn is_complete(&self) -> bool;

    /// The established session key; valid once the exchange is complete.
    fn session_key(&self) -> crate::Result<Vec<u8>>;
}
