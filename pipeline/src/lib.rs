// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lavra — Fiscal Document Emission Pipeline
//!
//! Lavra turns an in-memory invoice into a government-accepted electronic
//! fiscal document and a printable receipt. The whole crate exists to get
//! five steps right, in order, without losing a byte along the way:
//!
//! build → sign → transmit → reconcile → render.
//!
//! The hard constraints live between the steps. A signature is only worth
//! anything if canonicalization is bit-exact. A protocol is only mergeable
//! if its access key matches the document it claims to answer. A merged
//! artifact is only legal if the signed portion inside it was never touched.
//!
//! ## Architecture
//!
//! - **document** — Draft construction, field validation, access keys,
//!   partial updates, and numbering uniqueness.
//! - **xml** — Schema-exact writing and tolerant reading. The writer is
//!   deterministic; the reader forgives namespace prefixes.
//! - **sign** — Credential loading (sealed key files, certificates) and
//!   enveloped signature generation over the canonical form.
//! - **transport** — The authority's envelope protocol over HTTPS, with
//!   outcome classification and bounded retry.
//! - **reconcile** — The poll loop and the byte-preserving merge of signed
//!   document and authority protocol.
//! - **emission** — The tagged state machine and the end-to-end orchestrator.
//! - **render** — Projection of a final document into a fixed-layout,
//!   paginated PDF. Missing fields get placeholders, not panics.
//! - **config** — Constants and the one configuration struct everything
//!   receives explicitly.
//!
//! ## Design Philosophy
//!
//! 1. Determinism over convenience. Same draft, same bytes, same key.
//! 2. Terminal states are terminal. Nothing un-rejects a document.
//! 3. Distinct failures stay distinct. "Fix your data" is not "try later".
//! 4. If it touches the signed bytes, it has tests. Plural.

pub mod config;
pub mod document;
pub mod emission;
pub mod reconcile;
pub mod render;
pub mod sign;
pub mod transport;
pub mod xml;
