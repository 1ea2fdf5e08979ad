use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Opaque token naming one connection of a user within a group.
pub type Session = String;

/// Namespace that scopes sessions and message routing.
pub type Group = String;

/// Messages collected for one session, keyed by sending session.
pub type Inbox = HashMap<Session, Vec<String>>;

/// What a resolved fetch hands back to its caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
    /// The caller's session, freshly minted if it had none.
    pub session: Session,
    /// Other sessions in the group that joined at or after the caller's baseline.
    pub members: Vec<Session>,
    pub messages: Inbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub from: Session,
    pub to: Session,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub session: Session,
}
