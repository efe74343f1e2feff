//! # Hash
//!
//! FNV-1 32-bit hash used for template and custom-properties fingerprints.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1 (multiply, then xor) over `data`
pub fn fnv1_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV_PRIME) ^ u32::from(*byte)
    })
}

/// Lower-case hex rendering of [`fnv1_32`]
pub fn fnv1_32_hex(data: &[u8]) -> String {
    format!("{:x}", fnv1_32(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(fnv1_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1_32(b"a"), 0x050c_5d7e);
        assert_eq!(fnv1_32(b"foobar"), 0x31f0_b262);
    }

    #[test]
    fn test_hex_is_lowercase_without_padding() {
        assert_eq!(fnv1_32_hex(b"a"), "50c5d7e");
        assert_eq!(fnv1_32_hex(b"foobar"), "31f0b262");
    }
}
