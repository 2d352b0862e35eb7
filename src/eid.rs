use std::fmt::Display;

use ulid::Ulid;

/// Lexicographically sortable unique id, used to salt temp file names so
/// concurrent writers never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Eid(String);

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(Ulid::new().to_string())
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
