//! Payload transformation applied to every echoed chunk.
//!
//! The wire protocol has no framing: whatever arrives in one read is
//! transformed in place and written back as-is. Chunks are independent,
//! so a payload split across several reads is answered with the
//! concatenation of the per-chunk results.

/// Uppercase a chunk in place.
///
/// Only `a`-`z` are mapped; every other byte value (digits, punctuation,
/// control bytes and anything above 0x7F) passes through unchanged. This
/// is the same mapping as C `toupper` in the "C" locale.
pub fn uppercase_in_place(chunk: &mut [u8]) {
    chunk.make_ascii_uppercase();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercase_ascii_letters() {
        let mut buf = *b"hello";
        uppercase_in_place(&mut buf);
        assert_eq!(&buf, b"HELLO");

        let mut buf = *b"Hi! 123";
        uppercase_in_place(&mut buf);
        assert_eq!(&buf, b"HI! 123");
    }

    #[test]
    fn test_uppercase_matches_c_locale_toupper() {
        let mut all: Vec<u8> = (0..=255u8).collect();
        uppercase_in_place(&mut all);

        for (original, mapped) in (0..=255u8).zip(all) {
            let expected = if (b'a'..=b'z').contains(&original) {
                original - 32
            } else {
                original
            };
            assert_eq!(mapped, expected, "byte {original:#04x}");
        }
    }

    #[test]
    fn test_uppercase_empty_chunk() {
        let mut buf: [u8; 0] = [];
        uppercase_in_place(&mut buf);
        assert!(buf.is_empty());
    }
}
