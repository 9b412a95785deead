// ============================================================================
// COLOR — hex string <-> Rgba<u8> conversion for snapshots and settings
// ============================================================================

use image::Rgba;

/// Fully transparent pixel.  Alpha 0 is what the buffer treats as "empty".
pub const EMPTY: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional, case-insensitive).
pub fn parse_hex(s: &str) -> Option<Rgba<u8>> {
    let hex = s.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.is_ascii() {
        return None;
    }

    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            out[3] = 255;
            Some(Rgba(out))
        }
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

/// Format as `#rrggbb`, or `#rrggbbaa` when the color is not fully opaque.
pub fn to_hex(c: Rgba<u8>) -> String {
    let [r, g, b, a] = c.0;
    if a == 255 {
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
    }
}

#[inline]
pub fn is_empty(c: Rgba<u8>) -> bool {
    c.0[3] == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_long_and_alpha_forms() {
        assert_eq!(parse_hex("#ff0000"), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(parse_hex("0F0"), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(parse_hex("#11223380"), Some(Rgba([0x11, 0x22, 0x33, 0x80])));
        assert_eq!(parse_hex("#12345"), None);
        assert_eq!(parse_hex("#gg0000"), None);
    }

    #[test]
    fn hex_drops_alpha_only_when_opaque() {
        assert_eq!(to_hex(Rgba([255, 0, 0, 255])), "#ff0000");
        assert_eq!(to_hex(Rgba([1, 2, 3, 4])), "#01020304");
    }
}
