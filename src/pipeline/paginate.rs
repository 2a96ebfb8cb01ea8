//! Paginator: successful fetch outcomes → one multi-page PDF.
//!
//! Successes are sorted by `origin_index` and each becomes exactly one page,
//! appended in that order. Page geometry follows [`PageSizing`]:
//!
//! * `Native`: the page is the image's pixel size, 1 px = 1 pt.
//! * `FixedCanvas`: the page is constant; the image is scaled down by
//!   `min(1, W/w, H/h)` and centred.
//!
//! An image that decodes but will not embed gets one retry after conversion
//! to 8-bit RGB. If that fails too, [`RenderFailurePolicy`] decides between
//! dropping the page and inserting a blank one. A document with no pages is
//! never produced; that case is [`PipelineError::EmptyInput`].
//!
//! Everything here is CPU-bound and synchronous. Call it from
//! `tokio::task::spawn_blocking`.

use crate::config::{PageSize, PageSizing, PipelineConfig, RenderFailurePolicy};
use crate::error::{PageError, PipelineError};
use crate::output::{FetchOutcome, FetchedImage, PageInfo, RunSummary};
use crate::pipeline::fetch::decode_with_limits;
use crate::pipeline::pdf::{ImageXObject, PdfBuilder, Placement};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::{debug, info, warn};

/// The assembled document, before it is written anywhere.
#[derive(Debug)]
pub struct PaginatedPdf {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageInfo>,
    /// Images that did not make it onto a page (or became placeholders).
    pub page_errors: Vec<PageError>,
}

/// Build the document from `outcomes`. Failures in `outcomes` are ignored.
pub fn paginate(
    outcomes: &[FetchOutcome],
    config: &PipelineConfig,
) -> Result<PaginatedPdf, PipelineError> {
    let mut images: Vec<&FetchedImage> = outcomes
        .iter()
        .filter_map(|o| match o {
            FetchOutcome::Success(img) => Some(img),
            FetchOutcome::Failure { .. } => None,
        })
        .collect();
    images.sort_by_key(|img| img.origin_index);

    if images.is_empty() {
        return Err(PipelineError::EmptyInput {
            summary: Box::default(),
        });
    }

    info!("Paginating {} images", images.len());
    let total = images.len();
    let mut builder = PdfBuilder::new(config.watermark.as_deref());
    let mut pages = Vec::with_capacity(total);
    let mut page_errors = Vec::new();

    for img in images {
        let page_num = pages.len() + 1;
        match render_page(&mut builder, img, config) {
            Ok(rendered) => {
                pages.push(rendered.into_info(page_num, img));
            }
            Err(detail) => {
                warn!("Image {}: page render failed: {}", img.origin_index, detail);
                page_errors.push(PageError::RenderFailed {
                    origin_index: img.origin_index,
                    detail,
                });

                if config.render_failure == RenderFailurePolicy::Placeholder {
                    let (page, _) = layout(config.page_sizing, img.width, img.height);
                    builder
                        .add_blank_page(page)
                        .map_err(|e| PipelineError::internal(e.to_string()))?;
                    pages.push(PageInfo {
                        page_num,
                        origin_index: img.origin_index,
                        url: img.url.clone(),
                        width: page.width,
                        height: page.height,
                        image_width: 0.0,
                        image_height: 0.0,
                        converted: false,
                        placeholder: true,
                    });
                } else {
                    continue;
                }
            }
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_added(page_num, total);
        }
    }

    if pages.iter().all(|p| p.placeholder) {
        // Render failures travel with the error.
        return Err(PipelineError::EmptyInput {
            summary: Box::new(RunSummary {
                placeholder_pages: pages.len(),
                skipped_pages: page_errors.len() - pages.len(),
                page_errors,
                ..RunSummary::default()
            }),
        });
    }

    let bytes = builder
        .finish()
        .map_err(|e| PipelineError::internal(e.to_string()))?;

    debug!("Document: {} pages, {} bytes", pages.len(), bytes.len());
    Ok(PaginatedPdf {
        bytes,
        pages,
        page_errors,
    })
}

/// Page size and image placement for a `w`×`h` pixel image.
pub fn layout(sizing: PageSizing, w: u32, h: u32) -> (PageSize, Placement) {
    let (w, h) = (w.max(1) as f32, h.max(1) as f32);
    match sizing {
        PageSizing::Native => (
            PageSize {
                width: w,
                height: h,
            },
            Placement {
                x: 0.0,
                y: 0.0,
                width: w,
                height: h,
            },
        ),
        PageSizing::FixedCanvas(canvas) => {
            let scale = (canvas.width / w).min(canvas.height / h).min(1.0);
            let (dw, dh) = (w * scale, h * scale);
            (
                canvas,
                Placement {
                    x: (canvas.width - dw) / 2.0,
                    y: (canvas.height - dh) / 2.0,
                    width: dw,
                    height: dh,
                },
            )
        }
    }
}

struct Rendered {
    page: PageSize,
    at: Placement,
    converted: bool,
}

impl Rendered {
    fn into_info(self, page_num: usize, img: &FetchedImage) -> PageInfo {
        PageInfo {
            page_num,
            origin_index: img.origin_index,
            url: img.url.clone(),
            width: self.page.width,
            height: self.page.height,
            image_width: self.at.width,
            image_height: self.at.height,
            converted: self.converted,
            placeholder: false,
        }
    }
}

/// Decode, size and embed one image. Errors are reported as plain text and
/// handled by the caller's failure policy.
fn render_page(
    builder: &mut PdfBuilder,
    img: &FetchedImage,
    config: &PipelineConfig,
) -> Result<Rendered, String> {
    let bytes = std::fs::read(&img.path).map_err(|e| format!("reading {}: {e}", img.path.display()))?;

    let reader = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let format = reader.format();
    let mut decoded = decode_with_limits(reader).map_err(|e| e.to_string())?;

    let mut resized = false;
    if let Some(cap) = config.max_image_dimension {
        if decoded.width().max(decoded.height()) > cap {
            debug!(
                "Image {}: downscaling {}x{} to fit {}px",
                img.origin_index,
                decoded.width(),
                decoded.height(),
                cap
            );
            decoded = decoded.resize(cap, cap, FilterType::Triangle);
            resized = true;
        }
    }

    let (page, at) = layout(config.page_sizing, decoded.width(), decoded.height());

    let native = if format == Some(ImageFormat::Jpeg) && !resized {
        ImageXObject::from_jpeg(bytes, decoded.width(), decoded.height())
            .ok_or_else(|| "JPEG stream not embeddable as-is".to_string())
    } else {
        ImageXObject::from_pixels(&decoded).map_err(|e| e.to_string())
    };

    let (xobject, converted) = match native {
        Ok(x) => (x, false),
        Err(first) => {
            debug!(
                "Image {}: {}; retrying as 8-bit RGB",
                img.origin_index, first
            );
            let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
            let x = ImageXObject::from_pixels(&rgb)
                .map_err(|e| format!("{first}; after RGB conversion: {e}"))?;
            (x, true)
        }
    };

    builder
        .add_image_page(page, at, xobject)
        .map_err(|e| e.to_string())?;

    Ok(Rendered {
        page,
        at,
        converted,
    })
}
