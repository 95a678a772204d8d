//! Options controlling how an image is patched
//!
//! Every knob has a default matching what the command line tool does without flags,
//! so `PatchOptions::default()` is what [`crate::patch`] uses.

/// What to do with a fat (universal) container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatPolicy {
    /// Patch every 64-bit slice, skipping the others
    #[default]
    EachSlice,
    /// Fail with an unsupported format error
    Reject,
}

/// Which fields of an encryption info command are cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptPolicy {
    /// Only zero `cryptid`
    #[default]
    CryptIdOnly,
    /// Zero `cryptoff` and `cryptsize` as well
    WholeRange,
}

impl CryptPolicy {
    pub(crate) fn clears_range(&self) -> bool {
        matches!(self, CryptPolicy::WholeRange)
    }
}

/// Patching options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchOptions {
    pub fat_policy: FatPolicy,
    pub crypt_policy: CryptPolicy,
}

impl PatchOptions {
    /// Create new PatchOptions with default settings
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the fat policy
    pub fn with_fat_policy(mut self, fat_policy: FatPolicy) -> Self {
        self.fat_policy = fat_policy;
        self
    }

    /// Set the crypt policy
    pub fn with_crypt_policy(mut self, crypt_policy: CryptPolicy) -> Self {
        self.crypt_policy = crypt_policy;
        self
    }

    /// Reject fat containers instead of patching their slices
    pub fn reject_fat(self) -> Self {
        self.with_fat_policy(FatPolicy::Reject)
    }

    /// Also zero the encrypted range, not just the `cryptid` flag
    pub fn clear_crypt_range(self) -> Self {
        self.with_crypt_policy(CryptPolicy::WholeRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let opts = PatchOptions::new();
        assert_eq!(opts.fat_policy, FatPolicy::EachSlice);
        assert_eq!(opts.crypt_policy, CryptPolicy::CryptIdOnly);
        let opts = opts.reject_fat().clear_crypt_range();
        assert_eq!(opts.fat_policy, FatPolicy::Reject);
        assert!(opts.crypt_policy.clears_range());
    }
}
