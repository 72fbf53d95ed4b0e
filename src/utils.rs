//! Literal evaluation shared by the assembler and the result-exploration
//! surface (label names, hex, and decimal all resolve through here).

use std::collections::BTreeMap;

use anyhow::{bail, Result};

/// Resolve a source literal to a 32-bit value.
///
/// Accepts `0x`-prefixed hexadecimal (any case), decimal with an optional
/// leading `-`, or a label name looked up in `labels`. Decimal magnitudes
/// that cannot be stored in 32 bits are an error; hexadecimal digits
/// beyond 32 bits fold away, matching the assembler's tolerant hex
/// handling.
pub fn parse_literal(s: &str, labels: &BTreeMap<String, u32>) -> Result<u32> {
    let s = s.trim_matches([' ', '\t']);
    if s.is_empty() {
        bail!("expected a literal, got nothing");
    }

    let first = s.as_bytes()[0];
    if first != b'-' && !first.is_ascii_digit() {
        // must be a label
        return match labels.get(s) {
            Some(v) => Ok(*v),
            None => bail!("unresolved label \"{s}\""),
        };
    }

    let lower = s.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        let mut ret: u32 = 0;
        for c in hex.bytes() {
            let digit = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                _ => bail!("\"{hex}\" is not a valid hexadecimal number"),
            };
            ret = (ret << 4) | u32::from(digit);
        }
        return Ok(ret);
    }

    if let Some(mag) = lower.strip_prefix('-') {
        let mut ret: u32 = 0;
        for c in mag.bytes() {
            if !c.is_ascii_digit() {
                bail!("\"-{mag}\" is not a valid integer number");
            }
            if ret > 0x0E66_6666 {
                bail!("\"-{mag}\" has magnitude too large to store in 32 bits");
            }
            ret = ret.wrapping_mul(10).wrapping_add(u32::from(c - b'0'));
        }
        return Ok(ret.wrapping_neg());
    }

    let mut ret: u32 = 0;
    for c in lower.bytes() {
        if !c.is_ascii_digit() {
            bail!("\"{lower}\" is not a valid integer number");
        }
        if ret > 0x1999_9999 {
            bail!("\"{lower}\" has magnitude too large to store in 32 bits");
        }
        ret = ret.wrapping_mul(10).wrapping_add(u32::from(c - b'0'));
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn no_labels() -> BTreeMap<String, u32> {
        BTreeMap::new()
    }

    #[test]
    fn decimal() {
        assert_eq!(parse_literal("0", &no_labels()).unwrap(), 0);
        assert_eq!(parse_literal("1024", &no_labels()).unwrap(), 1024);
        assert_eq!(parse_literal("4294967295", &no_labels()).unwrap(), u32::MAX);
    }

    #[test]
    fn negative_decimal() {
        assert_eq!(parse_literal("-1", &no_labels()).unwrap(), 0xFFFF_FFFF);
        assert_eq!(parse_literal("-128", &no_labels()).unwrap(), 0xFFFF_FF80);
    }

    #[test]
    fn hex() {
        assert_eq!(parse_literal("0x1000", &no_labels()).unwrap(), 0x1000);
        assert_eq!(parse_literal("0XdeadBEEF", &no_labels()).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn labels_resolve() {
        let mut labels = BTreeMap::new();
        labels.insert("buffer".to_string(), 0x8000);
        assert_eq!(parse_literal("buffer", &labels).unwrap(), 0x8000);
        assert!(parse_literal("missing", &labels).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_literal("", &no_labels()).is_err());
        assert!(parse_literal("12ab", &no_labels()).is_err());
        assert!(parse_literal("0xg", &no_labels()).is_err());
        assert!(parse_literal("-12.5", &no_labels()).is_err());
    }

    #[test]
    fn rejects_oversized_decimal() {
        assert!(parse_literal("99999999999", &no_labels()).is_err());
        assert!(parse_literal("-99999999999", &no_labels()).is_err());
    }

    #[test]
    fn trims_surrounding_space() {
        assert_eq!(parse_literal(" \t42 ", &no_labels()).unwrap(), 42);
    }
}
