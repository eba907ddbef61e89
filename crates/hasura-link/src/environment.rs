//! Execution environment selection.
//!
//! The environment is supplied explicitly by the caller at build time and
//! only influences defaults; nothing in this crate inspects the process to
//! guess where it is running.

use crate::cache::CacheMode;

/// The kind of application the client is embedded in.
///
/// Long-running interactive applications benefit from the in-memory cache;
/// server-side processes usually issue each operation once and want fresh
/// data, so they default to the policy-disabled cache mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// A server-side or batch process. Defaults to [`CacheMode::None`].
    #[default]
    Server,
    /// An interactive application (GUI, TUI, long-lived session).
    /// Defaults to [`CacheMode::Memory`].
    Interactive,
}

impl Environment {
    /// The cache mode used when the builder is not given one explicitly.
    pub fn default_cache_mode(self) -> CacheMode {
        match self {
            Self::Server => CacheMode::None,
            Self::Interactive => CacheMode::Memory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_environment() {
        assert_eq!(Environment::default(), Environment::Server);
    }

    #[test]
    fn test_default_cache_modes() {
        assert!(matches!(
            Environment::Server.default_cache_mode(),
            CacheMode::None
        ));
        assert!(matches!(
            Environment::Interactive.default_cache_mode(),
            CacheMode::Memory
        ));
    }
}
