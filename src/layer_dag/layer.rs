//! Layer numbers encoded in node ids.
//!
//! Ids follow `<Prefix>^<layer>-<suffix>`, e.g. `M^1-001` (layer 1) or
//! `X^950-001` (layer 950). Ids that do not follow the convention are placed
//! in layer 0, so they can depend on nothing layered.

use std::fmt;

/// Layer number; lower layers are more foundational
pub type Layer = u32;

/// Layer assigned to ids that carry no layer
pub const UNLAYERED: Layer = 0;

/// The parts of a conventional node id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayeredId<'a> {
    pub prefix: &'a str,
    pub layer: Layer,
    pub suffix: &'a str,
}

impl<'a> LayeredId<'a> {
    /// Split `<Prefix>^<layer>-<suffix>`; None if `id` does not follow it
    pub fn parse(id: &'a str) -> Option<Self> {
        let (prefix, rest) = id.split_once('^')?;
        let (digits, suffix) = rest.split_once('-')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let layer = digits.parse().ok()?;
        Some(Self {
            prefix,
            layer,
            suffix,
        })
    }
}

impl fmt::Display for LayeredId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{}-{}", self.prefix, self.layer, self.suffix)
    }
}

/// Layer encoded in `id`, or [`UNLAYERED`]
pub fn extract_layer(id: &str) -> Layer {
    LayeredId::parse(id).map_or(UNLAYERED, |parsed| parsed.layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_layer_from_known_prefixes() {
        assert_eq!(extract_layer("M^1-001"), 1);
        assert_eq!(extract_layer("D^100-001"), 100);
        assert_eq!(extract_layer("F^900-001"), 900);
        assert_eq!(extract_layer("X^950-001"), 950);
    }

    #[test]
    fn test_parse_keeps_prefix_and_suffix() {
        let parsed = LayeredId::parse("Guard^42-pmf-check").unwrap();
        assert_eq!(parsed.prefix, "Guard");
        assert_eq!(parsed.layer, 42);
        assert_eq!(parsed.suffix, "pmf-check");
        assert_eq!(parsed.to_string(), "Guard^42-pmf-check");
    }

    #[test]
    fn test_unconventional_ids_are_unlayered() {
        assert_eq!(extract_layer("NONEXISTENT"), UNLAYERED);
        assert_eq!(extract_layer("M^-001"), UNLAYERED);
        assert_eq!(extract_layer("M^1a-001"), UNLAYERED);
        assert_eq!(extract_layer("M^12"), UNLAYERED);
        assert_eq!(extract_layer("M^99999999999999-001"), UNLAYERED);
    }
}
