//! # Document Rendering
//!
//! Turns any document XML this pipeline produces (draft, signed, or final)
//! into the fixed-layout PDF sheet that travels with the goods.
//!
//! Rendering is the forgiving end of the pipeline. Where the builder
//! rejects and the signer refuses, the renderer shrugs: a field the XML
//! does not carry becomes [`PLACEHOLDER`] on paper. The only hard
//! failures are input that is not XML at all and the PDF backend itself.

pub mod model;
pub mod pdf;

use thiserror::Error;

pub use model::RenderModel;

/// What the sheet shows where the XML had nothing to say.
pub const PLACEHOLDER: &str = "N/A";

#[derive(Debug, Error)]
pub enum RenderError {
    /// The input cannot be read as a document at all.
    #[error("input is not renderable xml: {reason}")]
    MalformedInput { reason: String },

    /// The PDF backend failed to compose the sheet.
    #[error("pdf backend failure: {reason}")]
    BackendFailure { reason: String },
}

/// Render document XML to PDF bytes.
///
/// A backend failure is retried once; the projection is deterministic,
/// so a second identical failure is final.
pub fn render_document(xml: &str) -> Result<Vec<u8>, RenderError> {
    let model = RenderModel::project(xml)?;
    match pdf::compose(&model) {
        Ok(bytes) => Ok(bytes),
        Err(first) => {
            tracing::warn!(error = %first, "pdf composition failed, retrying once");
            pdf::compose(&model)
        }
    }
}
