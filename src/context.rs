//! An explicit, cheaply-cloned context value threaded through constructors,
//! replacing the process-wide logging context (`loc_ctx`) of the original C
//! library. Carries a name used to tag `tracing` spans; holds no hidden
//! global state.

use std::fmt;

/// Context passed to [`crate::Database::open_with_context`] and
/// [`crate::Writer::new_with_context`].
#[derive(Clone, Debug, Default)]
pub struct Context {
    name: String,
}

impl Context {
    /// Creates a context tagged with `name`, shown in `tracing` spans.
    pub fn new(name: impl Into<String>) -> Context {
        Context { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            "<unnamed>".fmt(f)
        } else {
            self.name.fmt(f)
        }
    }
}
