//! FNV-1a 64-bit hashing for node identities and lineage paths.
//!
//! Same algorithm as the `.axi` digests used elsewhere in the stack: simple,
//! deterministic, non-cryptographic. These hashes only ever index in-memory
//! lookup tables, so collisions are always re-checked against node data.

pub(crate) const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// Hash arbitrary bytes.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_extend(FNV_OFFSET_BASIS, bytes)
}

/// Continue hashing from a previous state.
pub(crate) fn fnv1a64_extend(mut hash: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Chain a child hash onto its parent's lineage.
pub(crate) fn chain(parent: u64, child: u64) -> u64 {
    fnv1a64_extend(parent, &child.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(fnv1a64(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn chain_is_order_sensitive() {
        let a = fnv1a64(b"a");
        let b = fnv1a64(b"b");
        assert_ne!(chain(a, b), chain(b, a));
    }
}
