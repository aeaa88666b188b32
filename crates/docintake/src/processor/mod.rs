pub mod splitter;
#[cfg(test)]
pub(crate) mod test_support;

pub use splitter::{LopdfPageBuilder, PageBuilder, PageSplitter};

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// A single-page PDF cut from a larger upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifact {
    /// `page-{n}_{original name}`.
    pub file_name: String,
    /// 1-based position in the source document.
    pub page_index: u32,
    pub bytes: Vec<u8>,
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_SIGNATURE)
}

pub fn page_file_name(page_index: u32, source_name: &str) -> String {
    format!("page-{}_{}", page_index, source_name)
}
