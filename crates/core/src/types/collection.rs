//! Which remote collection an engine mirrors.

use serde::{Deserialize, Serialize};

/// A remote collection owned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Shopping cart line items.
    #[default]
    Cart,
    /// Saved-for-later entries. Each entry holds at most one unit.
    Wishlist,
}

impl CollectionKind {
    /// Path segment used by HTTP remotes.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Cart => "cart",
            Self::Wishlist => "wishlist",
        }
    }

    /// Upper bound on an entry's quantity imposed by the collection itself,
    /// independent of the server-supplied stock limit.
    #[must_use]
    pub const fn max_quantity(self) -> Option<u32> {
        match self {
            Self::Cart => None,
            Self::Wishlist => Some(1),
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}
