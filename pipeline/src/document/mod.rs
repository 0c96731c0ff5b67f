//! # Document Module
//!
//! Construction and validation of fiscal document drafts: the unsigned,
//! in-memory representation that everything downstream (signer, transport,
//! renderer) consumes.
//!
//! ## Architecture
//!
//! ```text
//! types.rs      — Core value types (DocumentKind, Party, LineItem, TaxTotals)
//! builder.rs    — DraftBuilder with collect-all-problems validation
//! access_key.rs — Deterministic 44-digit access key and its check digit
//! patch.rs      — DraftPatch for partial updates over an immutable snapshot
//! numbering.rs  — In-process uniqueness registry for numbering keys
//! ```
//!
//! ## Draft Lifecycle
//!
//! 1. **Payload** — A JSON-shaped [`InvoicePayload`] arrives from the caller.
//! 2. **Build** — [`DraftBuilder`] validates every field in one pass and
//!    computes the derived ones (item totals, document total, access key).
//! 3. **Claim** — The numbering key is claimed in the [`NumberingRegistry`];
//!    duplicates stop here, before any signature exists.
//! 4. **Sign** — The draft leaves this module and becomes immutable in
//!    practice: any later edit requires a new build and a new signature.
//!
//! ## Design Decisions
//!
//! - All monetary values are integer centavos and all quantities integer
//!   thousandths. No floating point anywhere near monetary values.
//! - Validation never stops at the first problem. The caller gets the full
//!   list of rejected fields in one round trip.
//! - Unknown payload fields are carried opaquely on the draft and written
//!   into the document's additional-information block, so callers running a
//!   newer field catalogue than this crate do not lose data.

pub mod access_key;
pub mod builder;
pub mod numbering;
pub mod patch;
pub mod types;

pub use access_key::AccessKey;
pub use builder::{DraftBuilder, FieldProblem, ValidationError};
pub use numbering::{NumberingKey, NumberingRegistry};
pub use patch::DraftPatch;
pub use types::{
    DocumentKind, FiscalDocumentDraft, InvoicePayload, LineItem, LineItemPayload, Numbering,
    Party, TaxTotals,
};
