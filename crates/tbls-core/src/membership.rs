//! Membership directory: the fixed mapping between long-lived identities and
//! the party indices used by the protocol.

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::UniversalId;
use crate::{Error, PartyId, Result};

/// Source of the current member set
pub trait Membership: Send + Sync {
    fn resolve(&self) -> BTreeMap<UniversalId, PartyId>;
}

impl<F> Membership for F
where
    F: Fn() -> BTreeMap<UniversalId, PartyId> + Send + Sync,
{
    fn resolve(&self) -> BTreeMap<UniversalId, PartyId> {
        self()
    }
}

/// Validated bijection `UniversalId <-> PartyId` over `1..=n`
#[derive(Debug, Clone)]
pub struct MembershipDirectory {
    by_universal: BTreeMap<UniversalId, PartyId>,
    by_party: BTreeMap<PartyId, UniversalId>,
}

impl MembershipDirectory {
    pub fn new(members: BTreeMap<UniversalId, PartyId>, n: usize) -> Result<Self> {
        if members.len() != n {
            return Err(Error::InvalidConfig(format!(
                "expected {n} members, got {}",
                members.len()
            )));
        }

        let mut by_party = BTreeMap::new();
        for (universal, party) in &members {
            if *party == 0 || *party as usize > n {
                return Err(Error::InvalidPartyId(*party));
            }
            if by_party.insert(*party, universal.clone()).is_some() {
                return Err(Error::DuplicatePartyId(*party));
            }
        }

        debug!(n, "Membership directory loaded");
        Ok(Self {
            by_universal: members,
            by_party,
        })
    }

    /// Resolve a membership source and validate it
    pub fn from_membership(source: &dyn Membership, n: usize) -> Result<Self> {
        Self::new(source.resolve(), n)
    }

    pub fn party_of(&self, universal: &UniversalId) -> Option<PartyId> {
        self.by_universal.get(universal).copied()
    }

    pub fn universal_of(&self, party: PartyId) -> Option<&UniversalId> {
        self.by_party.get(&party)
    }

    /// All party indices in ascending order
    pub fn parties(&self) -> Vec<PartyId> {
        self.by_party.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_party.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_party.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(entries: &[(&str, PartyId)]) -> BTreeMap<UniversalId, PartyId> {
        entries
            .iter()
            .map(|(u, p)| (UniversalId::from(*u), *p))
            .collect()
    }

    #[test]
    fn test_bijection_lookups() {
        let dir = MembershipDirectory::new(members(&[("aa", 2), ("bb", 1), ("cc", 3)]), 3).unwrap();

        assert_eq!(dir.len(), 3);
        assert_eq!(dir.parties(), vec![1, 2, 3]);
        assert_eq!(dir.party_of(&"aa".into()), Some(2));
        assert_eq!(dir.universal_of(1), Some(&UniversalId::from("bb")));
        assert_eq!(dir.party_of(&"dd".into()), None);
        assert_eq!(dir.universal_of(4), None);
    }

    #[test]
    fn test_rejects_non_bijective_maps() {
        assert!(matches!(
            MembershipDirectory::new(members(&[("aa", 1), ("bb", 2)]), 3),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(
            MembershipDirectory::new(members(&[("aa", 1), ("bb", 1)]), 2).unwrap_err(),
            Error::DuplicatePartyId(1)
        );
        assert_eq!(
            MembershipDirectory::new(members(&[("aa", 1), ("bb", 3)]), 2).unwrap_err(),
            Error::InvalidPartyId(3)
        );
        assert_eq!(
            MembershipDirectory::new(members(&[("aa", 0), ("bb", 1)]), 2).unwrap_err(),
            Error::InvalidPartyId(0)
        );
    }

    #[test]
    fn test_closure_membership() {
        let source = || members(&[("x", 1), ("y", 2)]);
        let dir = MembershipDirectory::from_membership(&source, 2).unwrap();
        assert_eq!(dir.party_of(&"y".into()), Some(2));
    }
}
