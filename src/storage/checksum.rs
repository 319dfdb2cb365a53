// Adler-32 checksum utility.
// Replaces the crc32c-based helper this module used to carry for a
// different on-disk page format; the hierarchical-store file format
// specifies Adler-32 over the whole 4096-byte page with the stored
// checksum field read as zero.

const ADLER_MOD: u32 = 65521;

/// Adler-32 over `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    // NMAX = 5552 is the largest chunk length for which `b` cannot
    // overflow u32 before the next modulo reduction.
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }

    (b << 16) | a
}

/// Adler-32 of a page buffer with its 4-byte checksum field (at offset 0)
/// treated as zero, matching the on-disk commit/load protocol.
pub fn page_checksum(buf: &[u8]) -> u32 {
    debug_assert!(buf.len() >= 4);
    if buf[0..4] == [0, 0, 0, 0] {
        adler32(buf)
    } else {
        let mut scratch = buf.to_vec();
        scratch[0..4].copy_from_slice(&[0, 0, 0, 0]);
        adler32(&scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adler32_empty() {
        assert_eq!(adler32(&[]), 1);
    }

    #[test]
    fn test_adler32_known_value() {
        // Adler-32 of "Wikipedia" is the textbook reference value.
        assert_eq!(adler32(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn test_page_checksum_ignores_checksum_field() {
        let mut page = vec![0u8; 4096];
        page[100] = 0xAB;
        let mut garbage_checksum = page.clone();
        garbage_checksum[0..4].copy_from_slice(&[9, 9, 9, 9]);
        assert_eq!(page_checksum(&page), page_checksum(&garbage_checksum));
    }
}
