//! Party file: the threshold and every member's endpoint and certificate

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tbls_core::{MembershipDirectory, PartyId};
use tbls_net::{AuthFunc, Certificate, PartyConnectionConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyEntry {
    pub id: PartyId,
    /// `host:port` the party listens on
    pub endpoint: String,
    pub certificate: Certificate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyFile {
    pub threshold: usize,
    pub parties: Vec<PartyEntry>,
}

impl PartyFile {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading party file {}", path.display()))?;
        let file: PartyFile = serde_json::from_str(&json)
            .with_context(|| format!("parsing party file {}", path.display()))?;
        file.directory()?;
        Ok(file)
    }

    pub fn n(&self) -> usize {
        self.parties.len()
    }

    pub fn members(&self) -> Vec<PartyId> {
        self.parties.iter().map(|p| p.id).collect()
    }

    /// Validated certificate fingerprint to party index mapping
    pub fn directory(&self) -> Result<MembershipDirectory> {
        let mut members = BTreeMap::new();
        for party in &self.parties {
            if members
                .insert(party.certificate.universal_id(), party.id)
                .is_some()
            {
                bail!("certificate of party {} is listed twice", party.id);
            }
        }
        Ok(MembershipDirectory::new(members, self.n())?)
    }

    /// Entry whose certificate is `certificate`
    pub fn find(&self, certificate: &Certificate) -> Result<&PartyEntry> {
        self.parties
            .iter()
            .find(|p| &p.certificate == certificate)
            .ok_or_else(|| anyhow!("identity {} is not in the party file", certificate))
    }

    /// Address book for every party, signing our side with `auth`
    pub fn connections(&self, auth: &AuthFunc) -> Vec<PartyConnectionConfig> {
        self.parties
            .iter()
            .map(|p| PartyConnectionConfig {
                id: p.id,
                endpoint: p.endpoint.clone(),
                certificate: p.certificate,
                auth: auth.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbls_net::Identity;

    fn sample(identities: &[Identity]) -> String {
        let parties: Vec<PartyEntry> = identities
            .iter()
            .enumerate()
            .map(|(i, id)| PartyEntry {
                id: i as PartyId + 1,
                endpoint: format!("127.0.0.1:{}", 7000 + i),
                certificate: id.certificate(),
            })
            .collect();
        serde_json::to_string(&PartyFile {
            threshold: 2,
            parties,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_and_lookup() {
        let identities: Vec<Identity> = (0..3).map(|_| Identity::generate()).collect();
        let file: PartyFile = serde_json::from_str(&sample(&identities)).unwrap();

        assert_eq!(file.n(), 3);
        assert_eq!(file.members(), vec![1, 2, 3]);
        assert_eq!(file.find(&identities[1].certificate()).unwrap().id, 2);
        assert!(file.find(&Identity::generate().certificate()).is_err());

        let directory = file.directory().unwrap();
        assert_eq!(directory.party_of(&identities[2].universal_id()), Some(3));
    }

    #[test]
    fn test_rejects_bad_membership() {
        let identity = Identity::generate();
        let mut file: PartyFile = serde_json::from_str(&sample(&[
            Identity::generate(),
            identity,
        ]))
        .unwrap();
        file.parties[1].id = 3;
        assert!(file.directory().is_err());

        file.parties[1].id = 2;
        file.parties[1].certificate = file.parties[0].certificate;
        assert!(file.directory().is_err());
    }
}
