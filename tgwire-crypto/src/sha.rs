//! One-shot hashing over several byte slices.
//!
//! The macros expand through `$crate`, so dependants do not need `sha1` or
//! `sha2` in their own manifests.

#[doc(hidden)]
pub mod reexport {
    pub use sha1::Sha1;
    pub use sha2::{Digest, Sha256};
}

/// SHA-1 of the concatenation of every argument, as `[u8; 20]`.
#[macro_export]
macro_rules! sha1 {
    ( $( $part:expr ),+ $(,)? ) => {{
        use $crate::sha::reexport::Digest as _;
        let mut hasher = $crate::sha::reexport::Sha1::new();
        $( hasher.update($part); )+
        let digest: [u8; 20] = hasher.finalize().into();
        digest
    }};
}

/// SHA-256 of the concatenation of every argument, as `[u8; 32]`.
#[macro_export]
macro_rules! sha256 {
    ( $( $part:expr ),+ $(,)? ) => {{
        use $crate::sha::reexport::Digest as _;
        let mut hasher = $crate::sha::reexport::Sha256::new();
        $( hasher.update($part); )+
        let digest: [u8; 32] = hasher.finalize().into();
        digest
    }};
}
