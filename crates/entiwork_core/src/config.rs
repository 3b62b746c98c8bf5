//! Usecase configuration.

/// Name of the usecase used when none is given.
pub const DEFAULT_USECASE: &str = "default";

/// Behaviour options of a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitOfWorkOptions {
    /// Drop unchanged instances from the identity map on pause.
    pub prune_on_pause: bool,
}

/// Per-usecase cache policy for serialized stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Cache records read from the store.
    pub cache_on_read: bool,
    /// Cache records written by a commit.
    pub cache_on_write: bool,
    /// Cache records of newly created entities.
    pub cache_on_new: bool,
}

impl CacheOptions {
    /// Cache on every access.
    pub const ALWAYS: Self = Self {
        cache_on_read: true,
        cache_on_write: true,
        cache_on_new: true,
    };

    /// Bypass the cache entirely.
    pub const NEVER: Self = Self {
        cache_on_read: false,
        cache_on_write: false,
        cache_on_new: false,
    };
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::ALWAYS
    }
}

/// Named description of a unit of work's purpose and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usecase {
    /// Usecase name, reported in errors and logs.
    pub name: String,
    /// Unit of work options.
    pub options: UnitOfWorkOptions,
    /// Store cache policy.
    pub cache: CacheOptions,
}

impl Default for Usecase {
    fn default() -> Self {
        Self::new(DEFAULT_USECASE)
    }
}

impl Usecase {
    /// Creates a usecase with default options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: UnitOfWorkOptions::default(),
            cache: CacheOptions::default(),
        }
    }

    /// Sets whether unchanged instances are pruned on pause.
    #[must_use]
    pub fn prune_on_pause(mut self, value: bool) -> Self {
        self.options.prune_on_pause = value;
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    /// The usecase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_usecase() {
        let usecase = Usecase::default();
        assert_eq!(usecase.name(), DEFAULT_USECASE);
        assert!(!usecase.options.prune_on_pause);
        assert_eq!(usecase.cache, CacheOptions::ALWAYS);
    }

    #[test]
    fn builder_pattern() {
        let usecase = Usecase::new("import")
            .prune_on_pause(true)
            .cache(CacheOptions::NEVER);
        assert!(usecase.options.prune_on_pause);
        assert!(!usecase.cache.cache_on_read);
        assert!(!usecase.cache.cache_on_new);
    }
}
