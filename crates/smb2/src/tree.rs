//! Tree-connect handles.

use std::sync::Arc;

use smb2_msg::{
    Command, PacketCodec, Request, ShareFlags, TreeConnectRequest, TreeConnectResponseDecoder,
    TreeDisconnectRequest,
};

use crate::connection::{accept, Connection};
use crate::session::SessionInfo;
use crate::Error;

/// A connected share within a session.
///
/// Requests sent through the tree are stamped with its TreeId; shares
/// carrying the ENCRYPT_DATA flag force their traffic through the session's
/// transform wrapping.
pub struct Tree {
    conn: Arc<Connection>,
    session: Arc<SessionInfo>,
    tree_id: u32,
    share_flags: ShareFlags,
}

impl Tree {
    pub(crate) async fn connect(
        conn: Arc<Connection>,
        session: Arc<SessionInfo>,
        path: &str,
    ) -> crate::Result<Tree> {
        let mut req = TreeConnectRequest::new(path);
        let (charge, _) = conn.request_credit_charge(0).await;
        req.header.credit_charge = charge;

        let rr = conn.send_with(&mut req, Some(&session), None).await?;
        let pkt = conn.recv(rr).await?;
        let tree_id = PacketCodec::new(&pkt).tree_id();
        let body = accept(Command::TreeConnect, &pkt)?;
        let r = TreeConnectResponseDecoder::new(body);
        if r.is_invalid() {
            return Err(Error::InvalidResponse(
                "broken tree connect response format".to_string(),
            ));
        }

        log::debug!("connected {path} as tree {tree_id:#x}");
        Ok(Tree {
            conn,
            session,
            tree_id,
            share_flags: r.share_flags(),
        })
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    pub fn share_flags(&self) -> ShareFlags {
        self.share_flags
    }

    /// Sends a request scoped to this tree and returns the successful
    /// response body.
    pub async fn send_recv(
        &self,
        cmd: Command,
        req: &mut dyn Request,
    ) -> crate::Result<Vec<u8>> {
        let rr = self
            .conn
            .send_with(req, Some(&self.session), Some(self))
            .await?;
        let pkt = self.conn.recv(rr).await?;
        Ok(accept(cmd, &pkt)?.to_vec())
    }

    /// Disconnects the tree.
    pub async fn disconnect(&self) -> crate::Result<()> {
        let (charge, _) = self.conn.request_credit_charge(0).await;
        let mut req = TreeDisconnectRequest::default();
        req.header.credit_charge = charge;
        self.send_recv(Command::TreeDisconnect, &mut req).await?;
        log::debug!("tree {:#x} disconnected", self.tree_id);
        Ok(())
    }
}
