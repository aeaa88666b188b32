use std::path::Path;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tempfile::TempDir;

use crate::error::SplitError;
use crate::processor::{is_pdf, page_file_name, PageArtifact};

/// Produces a standalone single-page document from a parsed source.
pub trait PageBuilder: Send + Sync {
    fn build_page(&self, source: &Document, page_number: u32) -> Result<Document, SplitError>;
}

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Maximum page-tree depth followed when resolving inherited attributes.
const MAX_TREE_DEPTH: usize = 64;

/// Copies one page and the objects it references into a fresh document.
///
/// Inherited attributes are resolved onto the page itself, so the new page
/// tree is a single `Pages` node. References to other pages (link
/// destinations, annotation back-pointers) are not followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfPageBuilder;

impl PageBuilder for LopdfPageBuilder {
    fn build_page(&self, source: &Document, page_number: u32) -> Result<Document, SplitError> {
        let page_id = *source
            .get_pages()
            .get(&page_number)
            .ok_or_else(|| page_error(page_number, "not in the page tree"))?;
        let mut page_dict = source
            .get_dictionary(page_id)
            .map_err(|e| page_error(page_number, e))?
            .clone();
        inherit_attributes(source, &mut page_dict);
        page_dict.remove(b"Parent");

        let mut page = Document::with_version(source.version.clone());
        page.max_id = source.max_id;

        let mut pending = Vec::new();
        for (_, value) in page_dict.iter() {
            collect_references(value, &mut pending);
        }
        while let Some(id) = pending.pop() {
            if id == page_id || page.objects.contains_key(&id) {
                continue;
            }
            let Ok(object) = source.get_object(id) else {
                continue;
            };
            if is_page_tree_node(object) {
                continue;
            }
            collect_references(object, &mut pending);
            page.objects.insert(id, object.clone());
        }

        let pages_id = page.new_object_id();
        page_dict.set("Parent", pages_id);
        page.objects.insert(page_id, Object::Dictionary(page_dict));
        page.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1_i64,
            }),
        );
        let catalog_id = page.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        // Fresh trailer: page outputs are written unencrypted.
        page.trailer.set("Root", catalog_id);

        page.renumber_objects();
        page.compress();

        let remaining = page.get_pages().len();
        if remaining != 1 {
            return Err(page_error(
                page_number,
                format!("expected 1 page after extraction, found {}", remaining),
            ));
        }

        Ok(page)
    }
}

fn page_error(page: u32, reason: impl ToString) -> SplitError {
    SplitError::Page {
        page,
        reason: reason.to_string(),
    }
}

fn inherit_attributes(source: &Document, page: &mut Dictionary) {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(id) = parent {
        if depth == MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = source.get_dictionary(id) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
}

fn collect_references(object: &Object, pending: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => pending.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, pending);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                collect_references(value, pending);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_references(value, pending);
            }
        }
        _ => {}
    }
}

fn is_page_tree_node(object: &Object) -> bool {
    let Object::Dictionary(dict) = object else {
        return false;
    };
    matches!(
        dict.get(b"Type"),
        Ok(Object::Name(name)) if name == b"Page" || name == b"Pages"
    )
}

pub struct PageSplitter {
    builder: Box<dyn PageBuilder>,
}

impl Default for PageSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSplitter {
    pub fn new() -> Self {
        Self::with_builder(LopdfPageBuilder)
    }

    pub fn with_builder<B: PageBuilder + 'static>(builder: B) -> Self {
        Self {
            builder: Box::new(builder),
        }
    }

    pub fn split_file(&self, path: &Path, source_name: &str) -> Result<Vec<PageArtifact>, SplitError> {
        let bytes = std::fs::read(path).map_err(|e| SplitError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.split(&bytes, source_name)
    }

    /// Splits `bytes` into one artifact per page, in original page order.
    ///
    /// Pages that fail to build are logged and skipped; their numbers are not
    /// reused. Fails with [`SplitError::Malformed`] if the input is not a PDF
    /// or no page could be extracted.
    pub fn split(&self, bytes: &[u8], source_name: &str) -> Result<Vec<PageArtifact>, SplitError> {
        let _span = tracing::info_span!("processor.split", file = source_name).entered();

        if !is_pdf(bytes) {
            return Err(SplitError::malformed(source_name, "missing %PDF- signature"));
        }

        let document = Document::load_mem(bytes)
            .map_err(|e| SplitError::malformed(source_name, format!("unreadable container: {}", e)))?;

        if document.is_encrypted() {
            tracing::debug!("{} carries an encryption dictionary, splitting anyway", source_name);
        }

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        tracing::debug!("{} has {} page(s)", source_name, page_numbers.len());

        let scratch = tempfile::Builder::new()
            .prefix("docintake-split-")
            .tempdir()
            .map_err(SplitError::Scratch)?;

        let mut artifacts = Vec::with_capacity(page_numbers.len());
        for page_number in page_numbers {
            let built = self
                .builder
                .build_page(&document, page_number)
                .and_then(|page| stage_page(&scratch, page, page_number));

            match built {
                Ok(page_bytes) => artifacts.push(PageArtifact {
                    file_name: page_file_name(page_number, source_name),
                    page_index: page_number,
                    bytes: page_bytes,
                }),
                Err(e) => {
                    tracing::warn!("Skipping page {} of {}: {}", page_number, source_name, e);
                }
            }
        }

        if artifacts.is_empty() {
            return Err(SplitError::malformed(source_name, "no pages extracted"));
        }

        tracing::info!("Split {} into {} page(s)", source_name, artifacts.len());
        Ok(artifacts)
    }
}

/// Writes the page into the scratch directory and reads the serialized bytes back.
fn stage_page(scratch: &TempDir, mut page: Document, page_number: u32) -> Result<Vec<u8>, SplitError> {
    let path = scratch.path().join(format!("page-{}.pdf", page_number));

    page.save(&path).map_err(|e| SplitError::Page {
        page: page_number,
        reason: format!("failed to serialize: {}", e),
    })?;

    let bytes = std::fs::read(&path).map_err(SplitError::Scratch)?;
    if !is_pdf(&bytes) {
        return Err(SplitError::Page {
            page: page_number,
            reason: "serialized page is not a PDF".to_string(),
        });
    }

    Ok(bytes)
}
