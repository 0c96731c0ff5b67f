//! # XML Module
//!
//! Both directions of the pipeline's XML traffic.
//!
//! ```text
//! writer.rs — Schema-exact, deterministic serialization of drafts and
//!             signature blocks. The canonical form here is what gets
//!             digested and signed, so byte stability is the contract.
//! tree.rs   — Tolerant event-driven parsing into a generic XmlNode tree.
//!             Matches on local names only; the authority's responses are
//!             not consistent about namespace prefixes and ours cannot
//!             afford to care.
//! ```
//!
//! The asymmetry is deliberate. We write strictly and read forgivingly.

pub mod tree;
pub mod writer;

pub use tree::XmlNode;

use thiserror::Error;

/// Errors from XML serialization and parsing.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("document has no root element")]
    EmptyDocument,

    #[error("unexpected end of input inside <{0}>")]
    UnexpectedEof(String),

    #[error("serialized document is not valid UTF-8")]
    NonUtf8,
}
