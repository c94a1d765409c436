//! PDF helpers: page rasterization and reading-order text extraction.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use pdfium_render::prelude::{
    PdfDocument, PdfPage, PdfPageObjectCommon, PdfPageObjectType, PdfPageObjectsCommon,
    PdfRenderConfig, Pdfium, PdfiumError,
};
use thiserror::Error;

/// Rasterization resolution bounds; PDF native resolution is 72 dpi.
const MIN_DPI: u32 = 72;
const MAX_DPI: u32 = 600;
pub const DEFAULT_DPI: u32 = 200;

/// Errors for invalid inputs handed to the pipeline.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input file is not a PDF: {path}")]
    NotAPdf { path: PathBuf },

    #[error("dpi {dpi} outside supported range {MIN_DPI}..={MAX_DPI}")]
    DpiRange { dpi: u32 },

    #[error("PDF has no pages: {path}")]
    EmptyDocument { path: PathBuf },

    #[error("failed to load Pdfium runtime: {0}")]
    Library(#[source] PdfiumError),

    #[error("failed to load PDF document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: PdfiumError,
    },

    #[error("failed to render page {page_index}: {source}")]
    PageRender {
        page_index: usize,
        #[source]
        source: PdfiumError,
    },

    #[error("failed to encode page {page_index} as PNG: {source}")]
    PageEncode {
        page_index: usize,
        #[source]
        source: image::ImageError,
    },
}

/// One rendered page.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
    pub mime_type: &'static str,
}

/// Text extracted from one page, with a count of embedded image objects so
/// callers can emit image placeholders.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_index: usize,
    pub text: String,
    pub image_count: usize,
}

/// Renders a PDF file into page-ordered PNG images.
///
/// The document handle is reopened on every traversal, so `render_pages` can
/// be called repeatedly without holding state between calls.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    path: PathBuf,
    dpi: u32,
}

impl PdfRasterizer {
    pub fn new(path: impl Into<PathBuf>, dpi: u32) -> Result<Self, InputError> {
        let path = path.into();
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(InputError::DpiRange { dpi });
        }
        probe_pdf_header(&path)?;
        Ok(Self { path, dpi })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> Result<usize, InputError> {
        let pdfium = load_pdfium().map_err(InputError::Library)?;
        let document = self.open(&pdfium)?;
        let count = document.pages().len() as usize;
        if count == 0 {
            return Err(InputError::EmptyDocument {
                path: self.path.clone(),
            });
        }
        Ok(count)
    }

    pub fn render_pages(&self) -> Result<Vec<PageImage>, InputError> {
        let pdfium = load_pdfium().map_err(InputError::Library)?;
        let document = self.open(&pdfium)?;

        let count = document.pages().len() as usize;
        if count == 0 {
            return Err(InputError::EmptyDocument {
                path: self.path.clone(),
            });
        }

        let mut images = Vec::with_capacity(count);
        for (page_index, page) in document.pages().iter().enumerate() {
            let target_width = (page.width().value * self.dpi as f32 / 72.0) as i32;
            let render_config = PdfRenderConfig::new().set_target_width(target_width.max(1));

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|source| InputError::PageRender { page_index, source })?;

            let width = bitmap.width() as u32;
            let height = bitmap.height() as u32;
            let rgba = bitmap.as_rgba_bytes();

            let mut encoded = Vec::new();
            let encoder = PngEncoder::new(&mut encoded);
            encoder
                .write_image(&rgba, width, height, ExtendedColorType::Rgba8)
                .map_err(|source| InputError::PageEncode { page_index, source })?;

            images.push(PageImage {
                page_index,
                width,
                height,
                png_data: encoded,
                mime_type: "image/png",
            });
        }

        Ok(images)
    }

    fn open<'a>(&self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, InputError> {
        pdfium
            .load_pdf_from_file(&self.path, None)
            .map_err(|source| InputError::Document {
                path: self.path.clone(),
                source,
            })
    }
}

fn probe_pdf_header(path: &Path) -> Result<(), InputError> {
    let metadata = fs::metadata(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            InputError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            InputError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    if !metadata.is_file() {
        return Err(InputError::NotAPdf {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let head = &bytes[..bytes.len().min(1024)];
    if !head.windows(5).any(|window| window == b"%PDF-") {
        return Err(InputError::NotAPdf {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Extract text from every page, preserving reading order.
///
/// Individual page failures are returned in place so callers can degrade to
/// partial output instead of aborting the document.
pub fn extract_page_texts(path: &Path) -> Result<Vec<Result<PageText, String>>, InputError> {
    probe_pdf_header(path)?;
    let pdfium = load_pdfium().map_err(InputError::Library)?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|source| InputError::Document {
            path: path.to_path_buf(),
            source,
        })?;

    if document.pages().len() == 0 {
        return Err(InputError::EmptyDocument {
            path: path.to_path_buf(),
        });
    }

    let mut pages = Vec::with_capacity(document.pages().len() as usize);
    for (page_index, page) in document.pages().iter().enumerate() {
        let image_count = page
            .objects()
            .iter()
            .filter(|object| object.object_type() == PdfPageObjectType::Image)
            .count();

        match layout_page_text(&page) {
            Ok(text) => pages.push(Ok(PageText {
                page_index,
                text,
                image_count,
            })),
            Err(source) => pages.push(Err(format!("page {page_index}: {source}"))),
        }
    }

    Ok(pages)
}

struct Glyph {
    ch: char,
    left: f32,
    right: f32,
    height: f32,
    baseline: f32,
}

/// Rebuild lines from glyph geometry.
///
/// Circled-digit choice markers and Korean text survive because we emit the
/// glyphs verbatim; only spacing and line breaks are inferred, using the
/// median glyph height to separate lines and the median horizontal gap to
/// re-insert collapsed spaces.
fn layout_page_text(page: &PdfPage<'_>) -> Result<String, PdfiumError> {
    let text = page.text()?;
    let chars = text.chars();

    let mut glyphs = Vec::with_capacity(chars.len());
    for ch in chars.iter() {
        let Some(value) = ch.unicode_char() else {
            continue;
        };
        if value == '\u{0}' || value == '\r' {
            continue;
        }

        let rect = match ch.tight_bounds().or_else(|_| ch.loose_bounds()) {
            Ok(rect) => rect,
            Err(_) => continue,
        };
        let baseline = match ch.origin_y() {
            Ok(points) => points.value,
            Err(_) => rect.bottom().value,
        };

        glyphs.push(Glyph {
            ch: value,
            left: rect.left().value,
            right: rect.right().value,
            height: (rect.top().value - rect.bottom().value).abs(),
            baseline,
        });
    }

    if glyphs.is_empty() {
        return Ok(String::new());
    }

    let median_height = median(
        glyphs
            .iter()
            .map(|g| g.height)
            .filter(|h| h.is_finite() && *h > 0.0)
            .collect(),
    )
    .unwrap_or(8.0);
    let line_threshold = (median_height * 0.8).max(1.0);

    let gap_samples: Vec<f32> = glyphs
        .windows(2)
        .filter(|pair| (pair[1].baseline - pair[0].baseline).abs() <= line_threshold)
        .map(|pair| pair[1].left - pair[0].right)
        .filter(|gap| gap.is_finite() && *gap > 0.0)
        .collect();
    let default_gap = (median_height * 0.45).max(0.75);
    let space_threshold = median(gap_samples)
        .map(|gap| gap.max(default_gap * 0.8))
        .unwrap_or(default_gap);

    let mut out = String::new();
    let mut previous: Option<&Glyph> = None;

    for glyph in &glyphs {
        if glyph.ch == '\n' {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            previous = None;
            continue;
        }

        if let Some(prev) = previous {
            let baseline_delta = (glyph.baseline - prev.baseline).abs();
            if baseline_delta > line_threshold {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            } else {
                let gap = glyph.left - prev.right;
                if gap > space_threshold && !prev.ch.is_whitespace() && !glyph.ch.is_whitespace() {
                    out.push(' ');
                }
            }
        }

        out.push(glyph.ch);
        previous = Some(glyph);
    }

    Ok(out)
}

fn median(mut values: Vec<f32>) -> Option<f32> {
    values.retain(|value| value.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(values[values.len() / 2])
}

fn load_pdfium() -> Result<Pdfium, PdfiumError> {
    if let Some(result) = bind_from_env("PDFIUM_LIBRARY_PATH") {
        return result;
    }

    for var in ["PDFIUM_LIB_DIR", "PDFIUM_DYNAMIC_LIB_PATH"] {
        if let Some(result) = bind_from_env(var) {
            if result.is_ok() {
                return result;
            }
        }
    }

    match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(primary) => match Pdfium::bind_to_system_library() {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(_) => Err(primary),
        },
    }
}

fn bind_from_env(var: &str) -> Option<Result<Pdfium, PdfiumError>> {
    let value = env::var_os(var)?;
    let path = PathBuf::from(&value);
    if path.is_dir() {
        let lib_path = Pdfium::pdfium_platform_library_name_at_path(&path);
        Some(Pdfium::bind_to_library(lib_path).map(Pdfium::new))
    } else if path.exists() {
        Some(Pdfium::bind_to_library(&path).map(Pdfium::new))
    } else {
        None
    }
}
