//! Wire shapes for the supported dialects and the conversions between them.
//!
//! The Responses form is the canonical internal representation; every other
//! dialect converts into it (requests) or is produced from it (streams).

pub(crate) mod anthropic;
pub(crate) mod chat;
pub(crate) mod gemini;
pub(crate) mod responses;
