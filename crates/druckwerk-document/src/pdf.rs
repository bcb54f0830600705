// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF page operations using the `lopdf` crate: page counting, appending one
// document to another (the scan merge primitive), dropping the last page
// (undo), and building image-only documents from JPEG-encoded pages.

use std::collections::HashMap;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tracing::{debug, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};

/// An open PDF with the operations Druckwerk needs.
///
/// Wraps `lopdf::Document`; page-level surgery is done by cloning page
/// objects (with their transitively referenced resources) into a fresh
/// document, which keeps the output self-contained.
pub struct PdfFile {
    document: Document,
}

impl PdfFile {
    /// Load a PDF from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data)
            .map_err(|err| DruckwerkError::Pdf(format!("failed to load PDF from memory: {err}")))?;
        Ok(Self { document })
    }

    /// Load a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let document = Document::load(path.as_ref()).map_err(|err| {
            DruckwerkError::Pdf(format!("failed to open {}: {err}", path.as_ref().display()))
        })?;
        Ok(Self { document })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Borrow the underlying lopdf document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Append all pages of `other` after this document's pages.
    ///
    /// Returns the merged document as bytes; neither input is modified.
    #[instrument(skip_all, fields(base_pages = self.page_count(), other_len = other.len()))]
    pub fn append(&self, other: &[u8]) -> Result<Vec<u8>> {
        let other_doc = Document::load_mem(other)
            .map_err(|err| DruckwerkError::Pdf(format!("failed to load appended PDF: {err}")))?;

        let mut merged = self.document.clone();
        let pages_id = catalog_pages_id(&merged)?;

        let other_pages = other_doc.get_pages();
        let mut page_numbers: Vec<u32> = other_pages.keys().copied().collect();
        page_numbers.sort();

        let mut importer = PageImporter::new(&other_doc);
        for page_num in page_numbers {
            importer.import_page(&mut merged, pages_id, other_pages[&page_num])?;
        }

        let bytes = save_document(merged)?;
        debug!(output_bytes = bytes.len(), "append complete");
        Ok(bytes)
    }

    /// Rebuild the document without its final page.
    ///
    /// A one-page input yields a valid zero-page document; the caller keeps
    /// the handle alive either way.
    #[instrument(skip(self), fields(pages = self.page_count()))]
    pub fn without_last_page(&self) -> Result<Vec<u8>> {
        let pages = self.document.get_pages();
        let total = pages.len() as u32;

        let (mut out, pages_id) = empty_document();
        let mut importer = PageImporter::new(&self.document);
        for page_num in 1..total {
            let page_id = *pages.get(&page_num).ok_or_else(|| {
                DruckwerkError::Pdf(format!("page {page_num} missing from page tree"))
            })?;
            importer.import_page(&mut out, pages_id, page_id)?;
        }

        save_document(out)
    }
}

/// Count the pages of a PDF given only its bytes.
pub fn page_count(data: &[u8]) -> Result<usize> {
    Ok(PdfFile::from_bytes(data)?.page_count())
}

/// Count the pages of a PDF on disk.
pub fn page_count_of_file(path: impl AsRef<Path>) -> Result<usize> {
    Ok(PdfFile::open(path)?.page_count())
}

/// Incrementally builds a document out of JPEG page images and/or pages
/// cloned from an existing document.
///
/// Used by the auto-crop pipeline, which re-emits every source page either
/// as a freshly encoded image or verbatim.
pub struct PdfBuilder {
    document: Document,
    pages_id: ObjectId,
    page_count: u32,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        let (document, pages_id) = empty_document();
        Self {
            document,
            pages_id,
            page_count: 0,
        }
    }

    /// Append a page consisting of a single full-bleed JPEG image.
    ///
    /// The page box is sized so that the image renders at `dpi`.
    pub fn add_jpeg_page(&mut self, jpeg: Vec<u8>, width_px: u32, height_px: u32, dpi: f32) {
        let scale = 72.0 / dpi.max(1.0);
        let page_w = width_px as f32 * scale;
        let page_h = height_px as f32 * scale;

        let image_id = self.document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width_px as i64,
                "Height" => height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        // Scale the unit image square up to the page box.
        let content = format!("q {page_w:.2} 0 0 {page_h:.2} 0 0 cm /Im0 Do Q");
        let content_id = self
            .document
            .add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
        };
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_w),
                Object::Real(page_h),
            ],
            "Resources" => resources,
            "Contents" => Object::Reference(content_id),
        });

        register_page(&mut self.document, self.pages_id, page_id);
        self.page_count += 1;
    }

    /// Append a page cloned verbatim from `source`.
    pub fn add_cloned_page(&mut self, source: &Document, page_id: ObjectId) -> Result<()> {
        PageImporter::new(source).import_page(&mut self.document, self.pages_id, page_id)?;
        self.page_count += 1;
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Serialise the accumulated document.
    pub fn finish(self) -> Result<Vec<u8>> {
        save_document(self.document)
    }
}

// ---------------------------------------------------------------------------
// Document plumbing
// ---------------------------------------------------------------------------

/// Create a document with an empty page tree and a catalog pointing at it.
fn empty_document() -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => Vec::<Object>::new(),
        "Count" => 0,
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    (doc, pages_id)
}

fn save_document(mut doc: Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|err| DruckwerkError::Pdf(format!("failed to serialise PDF: {err}")))?;
    Ok(output)
}

/// Register an existing page object as the last kid of the page-tree node.
fn register_page(doc: &mut Document, pages_id: ObjectId, page_id: ObjectId) {
    let Ok(Object::Dictionary(pages)) = doc.get_object_mut(pages_id) else {
        return;
    };
    if let Ok(Object::Array(kids)) = pages.get_mut(b"Kids") {
        kids.push(Object::Reference(page_id));
    }
    if let Ok(Object::Integer(count)) = pages.get_mut(b"Count") {
        *count += 1;
    }
}

/// The object id of the catalog's `/Pages` node.
fn catalog_pages_id(doc: &Document) -> Result<ObjectId> {
    let catalog = doc
        .catalog()
        .map_err(|err| DruckwerkError::Pdf(format!("no catalog: {err}")))?;
    match catalog.get(b"Pages") {
        Ok(Object::Reference(id)) => Ok(*id),
        Ok(_) => Err(DruckwerkError::Pdf("/Pages is not a reference".into())),
        Err(err) => Err(DruckwerkError::Pdf(format!("no /Pages: {err}"))),
    }
}

/// Imports pages from one document into another.
///
/// Object identity is tracked across the whole import: each source id maps
/// to exactly one target id, so a resource referenced by several pages (a
/// shared font, one scan image reused across sides) lands in the target
/// once and is re-referenced, and reference cycles terminate because the
/// target id is reserved before its object is walked. `/Parent` keys are
/// dropped wherever they appear — imported pages answer to the destination
/// page tree, and importing a source parent link would drag the source's
/// sibling pages along with it.
struct PageImporter<'a> {
    source: &'a Document,
    imported: HashMap<ObjectId, ObjectId>,
}

impl<'a> PageImporter<'a> {
    fn new(source: &'a Document) -> Self {
        Self {
            source,
            imported: HashMap::new(),
        }
    }

    /// Import one page and hang it off `pages_id` in `target`.
    fn import_page(
        &mut self,
        target: &mut Document,
        pages_id: ObjectId,
        page_id: ObjectId,
    ) -> Result<()> {
        // The page itself must be readable; anything it merely references
        // may degrade (see `import_ref`).
        self.source
            .get_object(page_id)
            .map_err(|err| DruckwerkError::Pdf(format!("cannot read page {page_id:?}: {err}")))?;

        let imported_id = self.import_ref(target, page_id);
        register_page(target, pages_id, imported_id);
        if let Ok(Object::Dictionary(page_dict)) = target.get_object_mut(imported_id) {
            page_dict.set("Parent", Object::Reference(pages_id));
        }
        Ok(())
    }

    /// The target id for a source id, importing the object on first sight.
    ///
    /// The target slot is reserved (as Null) before the object graph is
    /// walked; a dangling source reference simply leaves the Null in
    /// place.
    fn import_ref(&mut self, target: &mut Document, id: ObjectId) -> ObjectId {
        if let Some(&mapped) = self.imported.get(&id) {
            return mapped;
        }
        let reserved = target.add_object(Object::Null);
        self.imported.insert(id, reserved);

        match self.source.get_object(id) {
            Ok(object) => {
                let imported = self.import_object(target, object);
                target.objects.insert(reserved, imported);
            }
            Err(err) => {
                warn!(?id, %err, "unresolvable reference stays Null");
            }
        }
        reserved
    }

    fn import_object(&mut self, target: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.import_ref(target, *id)),
            Object::Dictionary(dict) => Object::Dictionary(self.import_dict(target, dict)),
            Object::Stream(stream) => {
                let dict = self.import_dict(target, &stream.dict);
                Object::Stream(Stream::new(dict, stream.content.clone()))
            }
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.import_object(target, item))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    /// Walk a dictionary, dropping parent links (see type docs).
    fn import_dict(&mut self, target: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut imported = Dictionary::new();
        for (key, value) in dict.iter() {
            if key == b"Parent" {
                continue;
            }
            imported.set(key.clone(), self.import_object(target, value));
        }
        imported
    }
}
