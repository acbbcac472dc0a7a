use std::fmt;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A command tag: one uppercase letter followed by a zero-padded index,
/// e.g. `A042`. Unique among in-flight commands on one connection.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Tag(pub String);

impl Tag {
    /// Sentinel tag for the implicit command represented by the server
    /// greeting. Never appears on the wire.
    pub fn connect() -> Self {
        Tag("CONNECT".to_string())
    }

    /// Sentinel tag for the disconnection event.
    pub fn disconnect() -> Self {
        Tag("DISCONNECT".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces the tags prefixed to each outgoing command. The prefix letter
/// is fixed at construction; the index wraps after [`MAX_INDEX`].
///
/// [`MAX_INDEX`]: TagGenerator::MAX_INDEX
#[derive(Debug)]
pub struct TagGenerator {
    letter: char,
    index: u16,
}

impl TagGenerator {
    pub const MAX_INDEX: u16 = 999;

    /// Generator with a prefix letter drawn uniformly from `A`-`Z`.
    pub fn new() -> Self {
        let mut rng = SmallRng::from_entropy();
        Self::with_letter((b'A' + rng.gen_range(0..26)) as char)
    }

    /// Generator with a fixed prefix letter.
    pub fn with_letter(letter: char) -> Self {
        debug_assert!(letter.is_ascii_uppercase());
        TagGenerator { letter, index: 0 }
    }

    /// Returns the current tag and advances the index.
    pub fn generate(&mut self) -> Tag {
        let index = self.index;
        self.index = if index >= Self::MAX_INDEX { 0 } else { index + 1 };
        Tag(format!("{}{:03}", self.letter, index))
    }

    /// `AXXX`-style label for diagnostics.
    pub fn label(&self) -> String {
        format!("{}XXX", self.letter)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}
