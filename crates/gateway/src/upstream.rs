//! Upstream endpoint selection: candidate URLs, request-shape variants, and
//! the probing sweep that picks the first usable combination.

pub(crate) mod selector;
pub(crate) mod url;
pub(crate) mod variant;
