//! HTTP character classes per [RFC 2616, Section 2.2].
//!
//! [RFC 2616, Section 2.2]: https://datatracker.ietf.org/doc/html/rfc2616#section-2.2

/// HTTP separator characters.
///
/// `separators = "(" | ")" | "<" | ">" | "@" | "," | ";" | ":" | "\" | <">
///             | "/" | "[" | "]" | "?" | "=" | "{" | "}" | SP | HT`
#[rustfmt::skip]
const SEPARATORS: &[u8] = &[
    b'(', b')', b'<', b'>', b'@',
    b',', b';', b':', b'\\', b'"',
    b'/', b'[', b']', b'?', b'=',
    b'{', b'}', b' ', b'\t',
];

/// Returns `true` for control characters (octets 0-31 and DEL).
#[inline(always)]
pub const fn is_ctl(byte: u8) -> bool {
    byte < 32 || byte == 127
}

/// Returns `true` for the HTTP separator characters, including SP and HT.
#[inline(always)]
pub fn is_separator(byte: u8) -> bool {
    SEPARATORS.contains(&byte)
}

/// Returns `true` for characters allowed in an HTTP token.
///
/// `token = 1*<any CHAR except CTLs or separators>`
#[inline(always)]
pub fn is_token_char(byte: u8) -> bool {
    byte.is_ascii() && !is_ctl(byte) && !is_separator(byte)
}

/// Returns `true` for linear-whitespace characters (SP and HT only;
/// the optional leading CRLF of LWS is handled by the reader).
#[inline(always)]
pub const fn is_lws(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Returns `true` for ASCII hex digits.
#[inline(always)]
pub const fn is_hex_digit(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

/// Converts one ASCII hex digit to its numeric value.
#[inline(always)]
pub const fn hex_value(byte: u8) -> Option<u32> {
    match byte {
        b'0'..=b'9' => Some((byte - b'0') as u32),
        b'a'..=b'f' => Some((byte - b'a') as u32 + 10),
        b'A'..=b'F' => Some((byte - b'A') as u32 + 10),
        _ => None,
    }
}
