/*++

Licensed under the Apache-2.0 license.

File Name:

   ecc.rs

Abstract:

    Parity bytes protecting the OTP data region.

--*/

/// Mask with the bits of every inclusive range set
const fn ranges(ranges: &[(u32, u32)]) -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < ranges.len() {
        let (start, end) = ranges[i];
        let mut bit = start;
        while bit <= end {
            mask |= 1 << bit;
            bit += 1;
        }
        i += 1;
    }
    mask
}

/// Mask with the listed bits set
const fn bits(bits: &[u32]) -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < bits.len() {
        mask |= 1 << bits[i];
        i += 1;
    }
    mask
}

/// Data bits covered by each parity bit. Bit n of a word is bit n % 8 of
/// byte n / 8.
const PARITY_MASKS: [u64; 8] = [
    bits(&[
        0, 1, 3, 4, 6, 8, 10, 11, 13, 15, 17, 19, 21, 23, 25, 26, 28, 30, 32, 34, 36, 38, 40, 42,
        44, 46, 48, 50, 52, 54, 56, 57, 59, 61, 63,
    ]),
    bits(&[
        0, 2, 3, 5, 6, 9, 10, 12, 13, 16, 17, 20, 21, 24, 25, 27, 28, 31, 32, 35, 36, 39, 40, 43,
        44, 47, 48, 51, 52, 55, 56, 58, 59, 62, 63,
    ]),
    ranges(&[
        (1, 3),
        (7, 10),
        (14, 17),
        (22, 25),
        (29, 32),
        (37, 40),
        (45, 48),
        (53, 56),
        (60, 63),
    ]),
    ranges(&[(4, 10), (18, 25), (33, 40), (49, 56)]),
    ranges(&[(11, 25), (41, 56)]),
    ranges(&[(26, 56)]),
    ranges(&[(57, 63)]),
    ranges(&[(0, 63)]),
];

pub const ECC_WORD_SIZE: usize = 8;

/// Parity byte of one 8 byte word
pub fn ecc_byte(word: [u8; ECC_WORD_SIZE]) -> u8 {
    let value = u64::from_le_bytes(word);
    PARITY_MASKS
        .iter()
        .enumerate()
        .fold(0u8, |parity, (k, mask)| {
            parity | ((((value & mask).count_ones() & 1) as u8) << k)
        })
}

/// One parity byte per 8 byte word of `data`; a trailing partial word is
/// zero extended.
pub fn ecc(data: &[u8]) -> Vec<u8> {
    data.chunks(ECC_WORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; ECC_WORD_SIZE];
            word[..chunk.len()].copy_from_slice(chunk);
            ecc_byte(word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(PARITY_MASKS[0], 0xab55_5555_56aa_ad5b);
        assert_eq!(PARITY_MASKS[1], 0xcd99_9999_9b33_366d);
        assert_eq!(PARITY_MASKS[2], 0xf1e1_e1e1_e3c3_c78e);
        assert_eq!(PARITY_MASKS[3], 0x01fe_01fe_03fc_07f0);
        assert_eq!(PARITY_MASKS[4], 0x01ff_fe00_03ff_f800);
        assert_eq!(PARITY_MASKS[5], 0x01ff_ffff_fc00_0000);
        assert_eq!(PARITY_MASKS[6], 0xfe00_0000_0000_0000);
        assert_eq!(PARITY_MASKS[7], u64::MAX);
    }

    #[test]
    fn test_ecc_vectors() {
        assert_eq!(ecc_byte([0; 8]), 0);
        assert_eq!(ecc_byte([1, 0, 0, 0, 0, 0, 0, 0]), 0x83);
        assert_eq!(ecc_byte([0, 0, 0, 0, 0, 0, 0, 0x80]), 0xc7);
        assert_eq!(ecc_byte([0xff; 8]), 0x7f);
        assert_eq!(
            ecc_byte([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]),
            0x20
        );
        assert_eq!(ecc_byte(*b"SOCSEC\0\0"), 0x1e);
    }

    #[test]
    fn test_ecc_region() {
        let mut data = vec![0u8; 8192];
        data[8] = 1;
        let parity = ecc(&data);
        assert_eq!(parity.len(), 1024);
        assert_eq!(parity[0], 0);
        assert_eq!(parity[1], 0x83);
        assert!(parity[2..].iter().all(|p| *p == 0));

        assert_eq!(ecc(&[0xff; 4]), vec![ecc_byte([0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0])]);
    }
}
