//! SMB2/3 client connection core.
//!
//! Over a single framed transport, a [`Connection`] negotiates protocol
//! capabilities and then multiplexes concurrent request/response exchanges:
//! credit-based flow control, per-session signing, optional session/tree
//! encryption, and a receive-side demultiplexer that routes every reply to
//! the caller that sent its request.
//!
//! ```no_run
//! # async fn run(mut authenticator: impl smb2::Authenticator) -> smb2::Result<()> {
//! let conn = smb2::Negotiator::default().connect("server:445").await?;
//! let session = conn.authenticate(&mut authenticator).await?;
//! let tree = session.tree_connect(r"\\server\files").await?;
//! tree.disconnect().await?;
//! session.logoff().await?;
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! File, directory and pipe operations are built on top of
//! [`Connection::send_with`] / [`Session::send_recv`] / [`Tree::send_recv`]
//! and are out of this crate's scope, as are the authentication mechanisms
//! themselves (see [`Authenticator`]).

#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod session;
pub mod tree;

pub use auth::Authenticator;
pub use connection::{
    Connection, ConnectionInfo, CreditAccount, Negotiator, PendingResponse, BROADCAST_MESSAGE_ID,
};
pub use error::{Error, ResponseError};
pub use session::{Session, SessionInfo};
pub use tree::Tree;

// Re-exports of the sibling crates for convenience
pub use smb2_msg as msg;
pub use smb2_transport as transport;

/// SMB result type
pub type Result<T> = std::result::Result<T, crate::Error>;
