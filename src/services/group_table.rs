use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::models::update::{Group, Session};
use crate::services::member::{Member, PendingFetch};

/// Counts reported by the coordinator for status pages and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FellowshipStats {
    pub groups: usize,
    pub members: usize,
    pub pending_fetches: usize,
}

/// Group name to the members of that group. Owned by the coordinator alone.
#[derive(Default)]
pub struct GroupTable {
    groups: HashMap<Group, HashMap<Session, Member>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The member map of `group`, created empty on first reference.
    pub fn group_mut(&mut self, group: &str) -> &mut HashMap<Session, Member> {
        self.groups.entry(group.to_string()).or_default()
    }

    pub fn member_mut(&mut self, group: &str, session: &str) -> Option<&mut Member> {
        self.groups.get_mut(group)?.get_mut(session)
    }

    /// Sessions of `group` other than `exclude` created at or after `baseline`,
    /// oldest first.
    pub fn members_since(
        &self,
        group: &str,
        exclude: &str,
        baseline: Option<Instant>,
    ) -> Vec<Session> {
        let Some(members) = self.groups.get(group) else {
            return Vec::new();
        };

        let mut joined: Vec<(&Session, Instant)> = members
            .iter()
            .filter(|(session, _)| session.as_str() != exclude)
            .filter(|(_, member)| baseline.map_or(true, |since| member.created_at() >= since))
            .map(|(session, member)| (session, member.created_at()))
            .collect();
        joined.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        joined.into_iter().map(|(session, _)| session.clone()).collect()
    }

    /// Remove every member idle for at least `ttl`. Groups emptied by this
    /// are dropped too; they come back on the next fetch that names them.
    pub fn remove_idle(&mut self, now: Instant, ttl: Duration) -> Vec<(Group, Session, Member)> {
        let mut expired = Vec::new();
        for (group, members) in self.groups.iter_mut() {
            let idle: Vec<Session> = members
                .iter()
                .filter(|(_, member)| member.is_idle(now, ttl))
                .map(|(session, _)| session.clone())
                .collect();
            for session in idle {
                if let Some(member) = members.remove(&session) {
                    expired.push((group.clone(), session, member));
                }
            }
        }
        self.groups.retain(|_, members| !members.is_empty());
        expired
    }

    /// Detach every parked fetch across all groups.
    pub fn take_all_waiters(&mut self) -> Vec<PendingFetch> {
        self.groups
            .values_mut()
            .flat_map(|members| members.values_mut())
            .flat_map(|member| member.take_waiters())
            .collect()
    }

    pub fn stats(&self) -> FellowshipStats {
        FellowshipStats {
            groups: self.groups.len(),
            members: self.groups.values().map(HashMap::len).sum(),
            pending_fetches: self
                .groups
                .values()
                .flat_map(|members| members.values())
                .map(Member::pending_count)
                .sum(),
        }
    }
}
