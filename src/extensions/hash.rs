//! Stable per-library keys.
//!
//! Extension data directories are named after a hash of the normalized
//! library root so the same library maps to the same directory across
//! sessions. The key is a cache key, not a security boundary: accidental
//! collisions are tolerated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::paths::normalize_for_key;

/// Digest used to derive library keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibraryKeyHasher {
    /// SHA-256, 64 lowercase hex digits.
    #[default]
    Sha256,
    /// 32-bit FNV-1a, 8 lowercase hex digits.
    Fnv1a,
}

impl LibraryKeyHasher {
    /// Hash an already-normalized key.
    pub fn digest(self, input: &str) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            Self::Fnv1a => fnv1a32_hex(input),
        }
    }
}

/// Key for a library root using the default digest.
pub fn hash_library_key(root: &str) -> String {
    hash_library_key_with(LibraryKeyHasher::default(), root)
}

/// Key for a library root using an explicit digest.
pub fn hash_library_key_with(hasher: LibraryKeyHasher, root: &str) -> String {
    hasher.digest(&normalize_for_key(root))
}

/// 32-bit FNV-1a over the UTF-8 bytes of `input`.
pub fn fnv1a32_hex(input: &str) -> String {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let hash = input.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    });
    format!("{hash:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a32_hex(""), "811c9dc5");
        assert_eq!(fnv1a32_hex("a"), "e40c292c");
        assert_eq!(fnv1a32_hex("foobar"), "bf9cf968");
    }

    #[test]
    fn test_sha256_is_hex_and_stable() {
        let key = hash_library_key("/home/me/notes");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key, hash_library_key("/home/me/notes/"));
        assert_eq!(key, hash_library_key("/home//me/notes"));
    }

    #[test]
    fn test_windows_roots_fold_case() {
        for hasher in [LibraryKeyHasher::Sha256, LibraryKeyHasher::Fnv1a] {
            assert_eq!(
                hash_library_key_with(hasher, "C:\\Lib"),
                hash_library_key_with(hasher, "c:\\lib")
            );
            assert_eq!(
                hash_library_key_with(hasher, "C:\\Lib\\"),
                hash_library_key_with(hasher, "C:/lib")
            );
        }
    }

    #[test]
    fn test_posix_roots_keep_case() {
        for hasher in [LibraryKeyHasher::Sha256, LibraryKeyHasher::Fnv1a] {
            assert_ne!(
                hash_library_key_with(hasher, "/Lib"),
                hash_library_key_with(hasher, "/lib")
            );
        }
    }

    #[test]
    fn test_backslash_root_is_case_insensitive() {
        // A backslash marks the root as Windows-style even without a drive letter.
        assert_eq!(hash_library_key("\\Lib"), hash_library_key("\\lib"));
        assert_eq!(fnv1a32_hex(&normalize_for_key("\\Lib")).len(), 8);
    }
}
