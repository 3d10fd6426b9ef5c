//! Path filtering for change records.
//!
//! The daemon only filters dotfiles on our behalf (and only when no inclusion
//! globs are configured), so every record is checked against a [`FileFilter`]
//! before it is classified. Filters receive the path relative to the watched
//! directory.
//!
//! # Examples
//!
//! ```
//! use wm_watcher::{CompositeFilter, FileFilter, GlobFilter, IgnoreFilter};
//! use camino::Utf8Path;
//!
//! let filter = CompositeFilter::new()
//!     .and(GlobFilter::new(&["**/*.js".to_owned()], false).unwrap())
//!     .and(IgnoreFilter::new(|path: &Utf8Path| path.starts_with("node_modules")));
//!
//! assert!(filter.should_process(Utf8Path::new("src/app.js")));
//! assert!(!filter.should_process(Utf8Path::new("src/app.css")));
//! assert!(!filter.should_process(Utf8Path::new("node_modules/pkg/index.js")));
//! assert!(!filter.should_process(Utf8Path::new(".cache/app.js")));
//! ```

use camino::{Utf8Component, Utf8Path};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::WatchError;

/// A predicate deciding which change records produce events.
///
/// # Thread Safety
///
/// Filters are shared with the manager task, so they must be [`Send`],
/// [`Sync`] and `'static`.
///
/// # Examples
///
/// ```
/// use wm_watcher::FileFilter;
/// use camino::Utf8Path;
///
/// struct SkipLogs;
///
/// impl FileFilter for SkipLogs {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() != Some("log")
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if events for this relative path should be emitted.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts all files.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Inclusion globs plus the dotfile rule.
///
/// - With no globs, every path is included (subject to the dotfile rule).
/// - With globs, a path must match at least one of them.
/// - Unless `dot` is set, a path with any segment starting with `.` is
///   rejected. This mirrors the daemon-side `includedotfiles: false`
///   expression.
///
/// `*` does not cross `/`; use `**` for recursive matches.
///
/// # Examples
///
/// ```
/// use wm_watcher::{FileFilter, GlobFilter};
/// use camino::Utf8Path;
///
/// let filter = GlobFilter::new(&["src/*.ts".to_owned()], false).unwrap();
/// assert!(filter.should_process(Utf8Path::new("src/app.ts")));
/// assert!(!filter.should_process(Utf8Path::new("src/nested/app.ts")));
///
/// let everything = GlobFilter::new(&[], true).unwrap();
/// assert!(everything.should_process(Utf8Path::new(".env")));
/// ```
#[derive(Debug, Clone)]
pub struct GlobFilter {
    globs: Option<GlobSet>,
    dot: bool,
}

impl GlobFilter {
    /// Compiles the inclusion globs.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Glob`] if a pattern is invalid.
    pub fn new(patterns: &[String], dot: bool) -> Result<Self, WatchError> {
        if patterns.is_empty() {
            return Ok(Self { globs: None, dot });
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }

        Ok(Self {
            globs: Some(builder.build()?),
            dot,
        })
    }

    /// Returns `true` if any inclusion globs are configured.
    #[inline]
    #[must_use]
    pub const fn has_globs(&self) -> bool {
        self.globs.is_some()
    }
}

impl FileFilter for GlobFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        if !self.dot && has_dot_segment(path) {
            return false;
        }

        self.globs.as_ref().is_none_or(|globs| globs.is_match(path))
    }
}

/// Adapts an ignore predicate into a [`FileFilter`].
///
/// The predicate returns `true` for paths that must be ignored.
pub struct IgnoreFilter<F> {
    predicate: F,
}

impl<F> IgnoreFilter<F>
where
    F: Fn(&Utf8Path) -> bool + Send + Sync + 'static,
{
    /// Wraps an ignore predicate.
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> std::fmt::Debug for IgnoreFilter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreFilter").finish_non_exhaustive()
    }
}

impl<F> FileFilter for IgnoreFilter<F>
where
    F: Fn(&Utf8Path) -> bool + Send + Sync + 'static,
{
    fn should_process(&self, path: &Utf8Path) -> bool {
        !(self.predicate)(path)
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// All filters must return `true` for the record to be processed.
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter.
    ///
    /// An empty composite filter accepts all files.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Returns the number of filters combined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if no filters were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for CompositeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

// Implement FileFilter for boxed filters
impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

// Implement FileFilter for Arc-wrapped filters (useful for shared filters)
impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

/// Returns `true` if any segment of the path starts with a dot.
fn has_dot_segment(path: &Utf8Path) -> bool {
    path.components().any(|component| match component {
        Utf8Component::Normal(name) => name.starts_with('.'),
        _ => false,
    })
}
