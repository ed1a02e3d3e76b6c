//! Token identifier type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A llama token identifier.
///
/// Matches the native `llama_token` representation (32-bit signed id).
/// Used by the aLoRA invocation-token accessors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Token(i32);

impl Token {
    /// Create a token from its raw id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// The raw token id.
    #[must_use]
    pub const fn id(self) -> i32 {
        self.0
    }
}

impl From<i32> for Token {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl From<Token> for i32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
