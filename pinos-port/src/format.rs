//! Format negotiation, delegated to an external, dependency-injected algebra.
//!
//! The port graph treats a format as an opaque tagged byte string and never
//! inspects its structure itself; all parsing/intersection is delegated to
//! whatever [`FormatAlgebra`] the embedder supplies. [`MimeFormat`] is a small
//! default implementation (MIME-type-with-parameters matching) so the crate is
//! usable standalone without a real media-format grammar.

use pinos_core::error::Error as CoreError;

use crate::error::{PortError, Result};

/// A pluggable format algebra: parse, intersect, and stringify opaque format
/// blobs without the port graph ever needing to know their internal shape.
pub trait FormatAlgebra {
    /// The parsed in-memory representation of a format blob.
    type Parsed;

    /// Parse a wire format string into `Self::Parsed`.
    fn parse(&self, raw: &str) -> Result<Self::Parsed>;

    /// Intersect two parsed formats. `pref_first` indicates which side's
    /// field ordering and preferred values should be kept when both sides
    /// allow a range of values.
    fn intersect(&self, a: &Self::Parsed, b: &Self::Parsed, pref_first: bool) -> Self::Parsed;

    /// Whether a parsed format represents "no possible format."
    fn is_empty(&self, format: &Self::Parsed) -> bool;

    /// Render back to the wire string form.
    fn to_string(&self, format: &Self::Parsed) -> String;
}

/// A minimal default [`FormatAlgebra`]: MIME-type-with-parameters, e.g.
/// `audio/raw,rate=48000,channels=2`. Parameter intersection keeps only
/// parameters present (with equal values) on both sides; the media type itself
/// must match exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeFormat;

/// A parsed MIME-style format: a media type plus an ordered parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMime {
    media_type: String,
    params: Vec<(String, String)>,
}

impl FormatAlgebra for MimeFormat {
    type Parsed = ParsedMime;

    fn parse(&self, raw: &str) -> Result<ParsedMime> {
        let mut parts = raw.split(',');
        let media_type = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PortError::Core(CoreError::invalid_argument("empty format string")))?
            .to_string();
        let mut params = Vec::new();
        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                PortError::Core(CoreError::invalid_argument(format!(
                    "malformed format parameter: {part}"
                )))
            })?;
            params.push((key.to_string(), value.to_string()));
        }
        Ok(ParsedMime { media_type, params })
    }

    fn intersect(&self, a: &ParsedMime, b: &ParsedMime, pref_first: bool) -> ParsedMime {
        if a.media_type != b.media_type {
            return ParsedMime {
                media_type: String::new(),
                params: Vec::new(),
            };
        }
        let (base, other) = if pref_first { (a, b) } else { (b, a) };
        let params = base
            .params
            .iter()
            .filter(|(k, v)| other.params.iter().any(|(ok, ov)| ok == k && ov == v))
            .cloned()
            .collect();
        ParsedMime {
            media_type: a.media_type.clone(),
            params,
        }
    }

    fn is_empty(&self, format: &ParsedMime) -> bool {
        format.media_type.is_empty()
    }

    fn to_string(&self, format: &ParsedMime) -> String {
        let mut s = format.media_type.clone();
        for (k, v) in &format.params {
            s.push(',');
            s.push_str(k);
            s.push('=');
            s.push_str(v);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_keeps_common_params() {
        let algebra = MimeFormat;
        let a = algebra.parse("audio/raw,rate=48000,channels=2").unwrap();
        let b = algebra.parse("audio/raw,rate=48000,channels=1").unwrap();
        let inter = algebra.intersect(&a, &b, true);
        assert_eq!(algebra.to_string(&inter), "audio/raw,rate=48000");
        assert!(!algebra.is_empty(&inter));
    }

    #[test]
    fn intersect_empty_on_type_mismatch() {
        let algebra = MimeFormat;
        let a = algebra.parse("audio/raw").unwrap();
        let b = algebra.parse("video/raw").unwrap();
        let inter = algebra.intersect(&a, &b, true);
        assert!(algebra.is_empty(&inter));
    }
}
