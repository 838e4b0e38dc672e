//! Call-context token threaded through blocking I/O paths.
//!
//! `Cx` carries no state today; it exists as a single seam every pager/WAL/
//! B+Tree call can be given so that cooperative cancellation, deadlines, or
//! tracing spans can be attached later without changing every function
//! signature in the workspace again.

use std::marker::PhantomData;

/// A capability-tagged call context. `Caps` defaults to `()`, meaning no
/// restrictions; narrower call sites can be given a `Cx<SomeCaps>` via
/// [`Cx::restrict`] to document (at the type level) that they must not, say,
/// recurse into another write transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cx<Caps = ()> {
    _caps: PhantomData<Caps>,
}

impl Cx<()> {
    #[must_use]
    pub const fn new() -> Self {
        Self { _caps: PhantomData }
    }
}

impl<Caps> Cx<Caps> {
    /// Narrows this context to a different capability tag. Zero-cost: the
    /// tag only exists at the type level.
    #[must_use]
    pub const fn restrict<NewCaps>(self) -> Cx<NewCaps> {
        Cx { _caps: PhantomData }
    }
}
