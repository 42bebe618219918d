//! 16-byte user identifiers and the set of identifiers allowed to tunnel.
//!
//! Identifiers travel as raw bytes in the connection header and are written
//! as UUID text (`d342d11e-d424-4583-b36e-524ab1f0afa4`) in configuration.

use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::str::FromStr;
use subtle::{Choice, ConstantTimeEq};

/// Length of an identifier on the wire.
pub const USER_ID_LEN: usize = 16;

/// A 16-byte client identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId([u8; USER_ID_LEN]);

impl UserId {
    pub const fn from_bytes(bytes: [u8; USER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; USER_ID_LEN] {
        &self.0
    }
}

/// Comparison that does not short-circuit on the first differing byte.
impl ConstantTimeEq for UserId {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl FromStr for UserId {
    type Err = RelayError;

    /// Parse UUID text. Dashes are optional; case is ignored.
    fn from_str(s: &str) -> RelayResult<Self> {
        let compact: String = s.trim().chars().filter(|c| *c != '-').collect();
        if compact.len() != USER_ID_LEN * 2 {
            return Err(RelayError::Config(format!(
                "identifier {s:?} must be 32 hex digits"
            )));
        }
        let mut bytes = [0u8; USER_ID_LEN];
        hex::decode_to_slice(&compact, &mut bytes)
            .map_err(|e| RelayError::Config(format!("identifier {s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &h[..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..]
        )
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({self})")
    }
}

/// The identifiers allowed to open sessions.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedIds {
    ids: Vec<UserId>,
}

impl AuthorizedIds {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Add an identifier. Duplicates are ignored.
    pub fn insert(&mut self, id: UserId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Check membership. Every entry is compared so the time taken does not
    /// depend on where (or whether) a match occurs.
    pub fn contains(&self, id: &UserId) -> bool {
        let found = self
            .ids
            .iter()
            .fold(Choice::from(0), |found, candidate| found | candidate.ct_eq(id));
        found.into()
    }

    /// Verify an identifier, failing with [`RelayError::Unauthorized`].
    pub fn verify(&self, id: &UserId) -> RelayResult<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(RelayError::Unauthorized)
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<UserId> for AuthorizedIds {
    fn from_iter<T: IntoIterator<Item = UserId>>(iter: T) -> Self {
        let mut set = AuthorizedIds::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    #[test]
    fn parse_and_display_uuid() {
        let id: UserId = SAMPLE.parse().unwrap();
        assert_eq!(id.as_bytes()[0], 0xd3);
        assert_eq!(id.as_bytes()[15], 0xa4);
        assert_eq!(id.to_string(), SAMPLE);
    }

    #[test]
    fn parse_without_dashes_and_uppercase() {
        let a: UserId = SAMPLE.parse().unwrap();
        let b: UserId = "D342D11ED4244583B36E524AB1F0AFA4".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_rejects_bad_text() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
        assert!("d342d11e-d424-4583-b36e-524ab1f0afa".parse::<UserId>().is_err());
        assert!("z342d11e-d424-4583-b36e-524ab1f0afa4".parse::<UserId>().is_err());
    }

    #[test]
    fn ct_eq_matches_eq() {
        let a: UserId = SAMPLE.parse().unwrap();
        let b = UserId::from_bytes([0u8; USER_ID_LEN]);
        assert!(bool::from(a.ct_eq(&a)));
        assert!(!bool::from(a.ct_eq(&b)));
        assert!(!bool::from(b.ct_eq(&a)));
    }

    #[test]
    fn authorized_set_membership() {
        let allowed: UserId = SAMPLE.parse().unwrap();
        let other = UserId::from_bytes([7u8; USER_ID_LEN]);
        let set: AuthorizedIds = [allowed, allowed].into_iter().collect();

        assert_eq!(set.len(), 1);
        assert!(set.verify(&allowed).is_ok());
        assert!(matches!(set.verify(&other), Err(RelayError::Unauthorized)));
    }

    #[test]
    fn membership_found_at_any_position() {
        let ids: Vec<UserId> = (1u8..=4).map(|b| UserId::from_bytes([b; USER_ID_LEN])).collect();
        let set: AuthorizedIds = ids.iter().copied().collect();
        for id in &ids {
            assert!(set.contains(id));
        }
        assert!(!set.contains(&UserId::from_bytes([5u8; USER_ID_LEN])));
    }

    #[test]
    fn empty_set_refuses_everyone() {
        let set = AuthorizedIds::new();
        assert!(set.is_empty());
        assert!(!set.contains(&UserId::from_bytes([0u8; USER_ID_LEN])));
    }
}
