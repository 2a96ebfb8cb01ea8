//! Low-level PDF assembly on top of `lopdf`.
//!
//! One image XObject per page, drawn by a single `cm`/`Do` pair, plus an
//! optional watermark line in the built-in Helvetica font. Pixel data is
//! Flate-compressed here; JPEG sources can be embedded unchanged with
//! `DCTDecode`.

use crate::config::PageSize;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;

/// Error raised while assembling or serialising the PDF.
#[derive(Debug, thiserror::Error)]
#[error("PDF assembly failed: {0}")]
pub struct PdfError(String);

impl PdfError {
    fn new(e: impl std::fmt::Display) -> Self {
        PdfError(e.to_string())
    }
}

/// Where the image is drawn on its page, in points from the bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// An encoded image ready to become an XObject.
#[derive(Debug)]
pub struct ImageXObject {
    width: u32,
    height: u32,
    color_space: &'static str,
    filter: &'static str,
    data: Vec<u8>,
    /// Flate-compressed 8-bit alpha channel.
    smask: Option<Vec<u8>>,
}

impl ImageXObject {
    /// Embed 8-bit Gray, GrayA, RGB or RGBA pixels as-is.
    ///
    /// Any other colour type is refused; the caller converts to RGB and
    /// tries again.
    pub fn from_pixels(img: &DynamicImage) -> Result<Self, PdfError> {
        let (width, height) = (img.width(), img.height());
        let (color_space, raw, alpha) = match img {
            DynamicImage::ImageLuma8(buf) => ("DeviceGray", buf.as_raw().clone(), None),
            DynamicImage::ImageRgb8(buf) => ("DeviceRGB", buf.as_raw().clone(), None),
            DynamicImage::ImageLumaA8(buf) => {
                let (color, alpha) = split_alpha(buf.as_raw(), 1);
                ("DeviceGray", color, alpha)
            }
            DynamicImage::ImageRgba8(buf) => {
                let (color, alpha) = split_alpha(buf.as_raw(), 3);
                ("DeviceRGB", color, alpha)
            }
            other => {
                return Err(PdfError(format!(
                    "unsupported colour type {:?}",
                    other.color()
                )))
            }
        };

        let expected = width as usize * height as usize * if color_space == "DeviceRGB" { 3 } else { 1 };
        if width == 0 || height == 0 || raw.len() != expected {
            return Err(PdfError(format!("bad pixel buffer for {width}x{height} image")));
        }

        Ok(Self {
            width,
            height,
            color_space,
            filter: "FlateDecode",
            data: deflate(&raw)?,
            smask: alpha.map(|a| deflate(&a)).transpose()?,
        })
    }

    /// Embed a baseline JPEG stream without re-encoding.
    ///
    /// Returns `None` for anything other than 1- or 3-component JPEGs, since
    /// CMYK and YCCK streams need a decode array this writer does not emit.
    pub fn from_jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        let color_space = match jpeg_components(&bytes)? {
            1 => "DeviceGray",
            3 => "DeviceRGB",
            _ => return None,
        };
        Some(Self {
            width,
            height,
            color_space,
            filter: "DCTDecode",
            data: bytes,
            smask: None,
        })
    }

    pub fn has_alpha(&self) -> bool {
        self.smask.is_some()
    }
}

/// Accumulates pages into a single `lopdf::Document`.
pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    watermark: Option<(String, ObjectId)>,
}

impl PdfBuilder {
    pub fn new(watermark: Option<&str>) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let watermark = watermark
            .map(winansi_text)
            .filter(|t| !t.trim().is_empty())
            .map(|text| {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                });
                (text, font_id)
            });

        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            watermark,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Append a page of size `page` with `image` drawn at `at`.
    pub fn add_image_page(
        &mut self,
        page: PageSize,
        at: Placement,
        image: ImageXObject,
    ) -> Result<(), PdfError> {
        let image_id = self.add_image(image);

        let mut operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(at.width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(at.height),
                    Object::Real(at.x),
                    Object::Real(at.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ];

        let mut resources = dictionary! {
            "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
        };

        if let Some((text, font_id)) = &self.watermark {
            let size = (page.width.min(page.height) * 0.03).clamp(6.0, 24.0);
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("g", vec![Object::Real(0.5)]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Real(size)]),
                Operation::new("Td", vec![Object::Real(size * 0.5), Object::Real(size * 0.5)]),
                Operation::new("Tj", vec![Object::string_literal(text.as_bytes().to_vec())]),
                Operation::new("ET", vec![]),
            ]);
            resources.set("Font", dictionary! { "F1" => Object::Reference(*font_id) });
        }

        self.push_page(page, Content { operations }, resources)
    }

    /// Append a page with nothing on it.
    pub fn add_blank_page(&mut self, page: PageSize) -> Result<(), PdfError> {
        self.push_page(page, Content { operations: vec![] }, Dictionary::new())
    }

    /// Write the page tree and catalog, then serialise.
    pub fn finish(mut self) -> Result<Vec<u8>, PdfError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::Reference(*id)).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(self.pages_id),
        });
        self.doc.trailer.set("Root", Object::Reference(catalog_id));
        self.doc.compress();

        let mut out = Vec::new();
        self.doc.save_to(&mut out).map_err(PdfError::new)?;
        Ok(out)
    }

    fn add_image(&mut self, image: ImageXObject) -> ObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => 8i64,
            "Filter" => image.filter,
        };

        if let Some(alpha) = image.smask {
            let mask = precompressed(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.width as i64,
                    "Height" => image.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8i64,
                    "Filter" => "FlateDecode",
                },
                alpha,
            );
            let mask_id = self.doc.add_object(mask);
            dict.set("SMask", Object::Reference(mask_id));
        }

        self.doc.add_object(precompressed(dict, image.data))
    }

    fn push_page(&mut self, page: PageSize, content: Content, resources: Dictionary) -> Result<(), PdfError> {
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode().map_err(PdfError::new)?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page.width),
                Object::Real(page.height),
            ],
            "Resources" => resources,
            "Contents" => Object::Reference(content_id),
        });
        self.page_ids.push(page_id);
        Ok(())
    }
}

/// A stream whose data is already encoded; `Document::compress` leaves it alone.
fn precompressed(dict: Dictionary, data: Vec<u8>) -> Stream {
    let mut stream = Stream::new(dict, data);
    stream.allows_compression = false;
    stream
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).map_err(PdfError::new)?;
    encoder.finish().map_err(PdfError::new)
}

/// Split interleaved `channels + 1` samples into colour and alpha planes.
/// The alpha plane is dropped when fully opaque.
fn split_alpha(raw: &[u8], channels: usize) -> (Vec<u8>, Option<Vec<u8>>) {
    let stride = channels + 1;
    let pixels = raw.len() / stride;
    let mut color = Vec::with_capacity(pixels * channels);
    let mut alpha = Vec::with_capacity(pixels);
    for px in raw.chunks_exact(stride) {
        color.extend_from_slice(&px[..channels]);
        alpha.push(px[channels]);
    }
    let opaque = alpha.iter().all(|&a| a == u8::MAX);
    (color, (!opaque).then_some(alpha))
}

/// Component count from the first SOF marker of a JPEG stream.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        // Fill bytes.
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // FF Cn | len(2) | precision(1) | height(2) | width(2) | Nf(1)
            return bytes.get(i + 9).copied();
        }
        if marker == 0xDA || len < 2 {
            return None;
        }
        i += 2 + len;
    }
    None
}

/// Helvetica only covers WinAnsi; anything outside printable ASCII becomes `?`.
fn winansi_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, LumaA, Rgb, RgbImage, Rgba};

    const PAGE: PageSize = PageSize {
        width: 100.0,
        height: 50.0,
    };

    fn full(page: PageSize) -> Placement {
        Placement {
            x: 0.0,
            y: 0.0,
            width: page.width,
            height: page.height,
        }
    }

    fn rgb(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 10, 10])))
    }

    #[test]
    fn builds_loadable_pdf_with_media_boxes() {
        let mut b = PdfBuilder::new(None);
        b.add_image_page(PAGE, full(PAGE), ImageXObject::from_pixels(&rgb(100, 50)).unwrap())
            .unwrap();
        b.add_blank_page(PageSize::LETTER).unwrap();
        assert_eq!(b.page_count(), 2);

        let bytes = b.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        let first = doc.get_dictionary(pages[&1]).unwrap();
        let mb = first.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(mb[2].as_float().unwrap(), 100.0);
        assert_eq!(mb[3].as_float().unwrap(), 50.0);
    }

    #[test]
    fn refuses_sixteen_bit_pixels() {
        let img = DynamicImage::ImageRgb16(ImageBuffer::from_pixel(2, 2, Rgb([1u16, 2, 3])));
        assert!(ImageXObject::from_pixels(&img).is_err());
        assert!(ImageXObject::from_pixels(&DynamicImage::ImageRgb8(img.to_rgb8())).is_ok());
    }

    #[test]
    fn alpha_becomes_soft_mask_unless_opaque() {
        let translucent = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 2, Rgba([1, 2, 3, 128])));
        assert!(ImageXObject::from_pixels(&translucent).unwrap().has_alpha());

        let opaque = DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(2, 2, LumaA([9, 255])));
        assert!(!ImageXObject::from_pixels(&opaque).unwrap().has_alpha());

        let gray = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(3, 1, Luma([7])));
        assert!(!ImageXObject::from_pixels(&gray).unwrap().has_alpha());
    }

    #[test]
    fn split_alpha_separates_planes() {
        let (color, alpha) = split_alpha(&[1, 2, 3, 4, 5, 6, 7, 8], 3);
        assert_eq!(color, vec![1, 2, 3, 5, 6, 7]);
        assert_eq!(alpha, Some(vec![4, 8]));
    }

    #[test]
    fn jpeg_component_count() {
        let mut buf = Vec::new();
        rgb(4, 4)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(jpeg_components(&buf), Some(3));
        assert!(ImageXObject::from_jpeg(buf, 4, 4).is_some());

        assert_eq!(jpeg_components(b"\x89PNG\r\n"), None);
        assert!(ImageXObject::from_jpeg(b"not a jpeg".to_vec(), 1, 1).is_none());
    }

    #[test]
    fn watermark_adds_font_resource() {
        let mut b = PdfBuilder::new(Some("scraped (c) café"));
        b.add_image_page(PAGE, full(PAGE), ImageXObject::from_pixels(&rgb(10, 5)).unwrap())
            .unwrap();
        let bytes = b.finish().unwrap();

        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let page_id = doc.get_pages()[&1];
        let content = doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("Tj"));
        assert!(text.contains("/F1"));
    }

    #[test]
    fn blank_watermark_is_ignored() {
        let b = PdfBuilder::new(Some("   "));
        assert!(b.watermark.is_none());
        assert_eq!(winansi_text("a\u{e9}b"), "a?b");
    }
}
