use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;
use subtle::ConstantTimeEq;

/// Unambiguous, human-typable alphabet: no `0/O` or `1/I`.
pub const DEFAULT_TOKEN_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const DEFAULT_TOKEN_LENGTH: usize = 6;

/// One-time signing code. `Debug` is redacted so sessions can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningToken(String);

impl SigningToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plaintext value, for persistence and out-of-band delivery only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compares a user-submitted code in constant time with respect to its content.
    pub fn matches(&self, submitted: &str) -> bool {
        let normalized = normalize_submitted(submitted);
        bool::from(self.0.as_bytes().ct_eq(normalized.as_bytes()))
    }
}

impl fmt::Debug for SigningToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningToken(***)")
    }
}

fn normalize_submitted(submitted: &str) -> String {
    submitted.trim().to_ascii_uppercase()
}

/// Produces fixed-length codes from the OS CSPRNG. Output does not depend on any
/// identifier or the wall clock.
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl TokenGenerator {
    /// Builds a generator; returns `None` for an empty alphabet, a zero length, or an
    /// alphabet containing lowercase letters (submitted codes are upper-cased).
    pub fn new(alphabet: &str, length: usize) -> Option<Self> {
        let mut chars: Vec<char> = alphabet.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        if chars.is_empty() || length == 0 || chars.iter().any(|c| c.is_lowercase()) {
            return None;
        }
        Some(Self {
            alphabet: chars,
            length,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self) -> SigningToken {
        let mut rng = OsRng;
        let code: String = (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();
        SigningToken(code)
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_TOKEN_ALPHABET.chars().collect(),
            length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_fixed_length_codes_from_alphabet() {
        let generator = TokenGenerator::default();
        for _ in 0..200 {
            let token = generator.generate();
            assert_eq!(token.expose().len(), DEFAULT_TOKEN_LENGTH);
            assert!(token
                .expose()
                .chars()
                .all(|c| DEFAULT_TOKEN_ALPHABET.contains(c)));
        }
    }

    #[test]
    fn codes_are_not_repeated_in_practice() {
        let generator = TokenGenerator::default();
        let codes: HashSet<String> = (0..500)
            .map(|_| generator.generate().expose().to_string())
            .collect();
        assert!(codes.len() > 490);
    }

    #[test]
    fn matching_tolerates_case_and_surrounding_whitespace() {
        let token = SigningToken::new("A2B3C4");
        assert!(token.matches("A2B3C4"));
        assert!(token.matches("  a2b3c4\n"));
        assert!(!token.matches("A2B3C5"));
        assert!(!token.matches("A2B3C"));
        assert!(!token.matches(""));
    }

    #[test]
    fn debug_output_is_redacted() {
        let token = SigningToken::new("SECRET");
        assert!(!format!("{token:?}").contains("SECRET"));
    }

    #[test]
    fn rejects_unusable_configuration() {
        assert!(TokenGenerator::new("", 6).is_none());
        assert!(TokenGenerator::new("ABC", 0).is_none());
        assert!(TokenGenerator::new("abc", 6).is_none());
        assert_eq!(TokenGenerator::new("AB23", 8).map(|g| g.length()), Some(8));
    }
}
