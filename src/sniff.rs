use crate::config::SNIFF_PREFIX_LEN;

pub const SEMICOLON: u8 = b';';
pub const COMMA: u8 = b',';

/// Chooses the field delimiter from the first [`SNIFF_PREFIX_LEN`] bytes of UTF-8 content.
///
/// Counts raw `;` and `,` occurrences and returns `,` only when commas strictly outnumber
/// semicolons; the semicolon dialect is the default. Quoting is ignored, so a semicolon file
/// whose free-text columns hold more commas than the prefix holds semicolons is mis-detected.
pub fn sniff_delimiter(content: &[u8]) -> u8 {
    sniff_delimiter_within(content, SNIFF_PREFIX_LEN)
}

/// Same as [`sniff_delimiter`] with a custom prefix length.
pub fn sniff_delimiter_within(content: &[u8], limit: usize) -> u8 {
    let prefix = &content[..content.len().min(limit)];
    let semicolons = memchr::memchr_iter(SEMICOLON, prefix).count();
    let commas = memchr::memchr_iter(COMMA, prefix).count();
    if commas > semicolons {
        COMMA
    } else {
        SEMICOLON
    }
}
