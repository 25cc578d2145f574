//! Composite `(user, site)` key used by the cache, the rotation guard, and the store.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, SiteId, UserId},
};

/// Identifies the token lineage of one user on one Atlassian site.
///
/// An empty [`SiteId`] is a valid, distinct key: it compares and hashes like any other site.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	/// User who delegated the refresh token.
	pub user: UserId,
	/// Site the token is scoped to (possibly empty).
	pub site: SiteId,
}
impl CacheKey {
	/// Creates a key for the provided user and site.
	pub fn new(user: UserId, site: SiteId) -> Self {
		Self { user, site }
	}

	/// Validates raw identifiers and builds a key from them.
	pub fn parse(user: impl AsRef<str>, site: impl AsRef<str>) -> Result<Self, IdentifierError> {
		Ok(Self::new(UserId::new(user)?, SiteId::new(site)?))
	}
}
impl Debug for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "CacheKey({self})")
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		if self.site.is_empty() {
			write!(f, "{}@<none>", self.user)
		} else {
			write!(f, "{}@{}", self.user, self.site)
		}
	}
}
