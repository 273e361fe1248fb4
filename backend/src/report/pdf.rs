use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::RgbImage;
use oct_shared::ImageId;
use std::path::{Path, PathBuf};
use printpdf::{
    BuiltinFont, Color, ColorBits, ColorSpace, Image, ImageTransform, ImageXObject,
    IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point, Px,
    Rgb,
};

use crate::analysis::model::Prediction;
use crate::analysis::preprocess;
use crate::config::AnalysisConfig;

// A4 in millimetres.
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const SIDE_MARGIN: f32 = 12.7;
const TOP_MARGIN: f32 = 16.9;
const BOTTOM_MARGIN: f32 = 16.9;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * SIDE_MARGIN;
// Nothing but the footer goes below this line.
const CONTENT_BOTTOM: f32 = BOTTOM_MARGIN + 4.0;
const PT_TO_MM: f32 = 0.3528;
// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

const IMAGE_DPI: f32 = 300.0;
const EMBED_SIZE: (u32, u32) = (640, 480);
const IMAGE_ASPECT: f32 = 0.75;

const TITLE: &str = "OCT Diagnostic Report";
const DISCLAIMER: [&str; 2] = [
    "This report is automatically generated and intended for clinical review assistance.",
    "It should not be used as the sole basis for diagnosis.",
];

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("PDF rendering failed: {0}")]
    Pdf(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn report_filename(image_id: &ImageId) -> String {
    format!("{}_report.pdf", image_id)
}

pub fn download_name(image_id: &ImageId) -> String {
    format!("report_{}.pdf", image_id)
}

pub async fn save(
    reports_folder: &Path,
    image_id: &ImageId,
    pdf: &[u8],
) -> Result<PathBuf, ReportError> {
    let path = reports_folder.join(report_filename(image_id));
    tokio::fs::write(&path, pdf).await?;
    log::info!("Saved report {}", path.display());
    Ok(path)
}

/// Everything printed on the report, already formatted for display.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub image_id: String,
    pub generated_at: String,
    pub summary: String,
    pub recommendation: String,
    pub probabilities: Vec<(String, f32)>,
    pub layer_thickness: Vec<(String, f32)>,
    pub input_image: Option<PathBuf>,
    pub mask_image: Option<PathBuf>,
}

impl ReportData {
    pub fn new(
        image_id: &ImageId,
        prediction: &Prediction,
        config: &AnalysisConfig,
        generated_at: DateTime<Local>,
        input_image: Option<PathBuf>,
        mask_image: Option<PathBuf>,
    ) -> Self {
        Self {
            image_id: image_id.to_string(),
            generated_at: generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            summary: prediction.summary(),
            recommendation: prediction.recommendation().to_string(),
            probabilities: prediction
                .probabilities
                .iter()
                .map(|(class, p)| (config.full_name(class), *p))
                .collect(),
            layer_thickness: config
                .layer_thickness
                .iter()
                .map(|(layer, value)| (layer.to_string(), *value))
                .collect(),
            input_image,
            mask_image,
        }
    }
}

fn pdf_error<E: std::fmt::Debug>(e: E) -> ReportError {
    ReportError::Pdf(format!("{:?}", e))
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVG_GLYPH_WIDTH * PT_TO_MM
}

/// Greedy word wrap on an approximate glyph width.
pub fn wrap(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let max_chars = ((max_width / (size * AVG_GLYPH_WIDTH * PT_TO_MM)) as usize).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word_chars = word.chars().count();
        let needed = if current.is_empty() {
            word_chars
        } else {
            current.chars().count() + 1 + word_chars
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn rgb(hex: u32) -> Color {
    let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
    Color::Rgb(Rgb::new(channel(16), channel(8), channel(0), None))
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

/// Decodes an image for embedding, scaled to a fixed raster so large scans
/// do not bloat the document.
fn load_embedded(path: Option<&Path>) -> Option<RgbImage> {
    let path = path?;
    match preprocess::load_image(path) {
        Ok(image) => {
            let (width, height) = EMBED_SIZE;
            Some(image.resize_exact(width, height, FilterType::Triangle).to_rgb8())
        }
        Err(e) => {
            log::warn!("Leaving {} out of the report: {}", path.display(), e);
            None
        }
    }
}

fn image_xobject(image: &RgbImage) -> ImageXObject {
    ImageXObject {
        width: Px(image.width() as usize),
        height: Px(image.height() as usize),
        color_space: ColorSpace::Rgb,
        bits_per_component: ColorBits::Bit8,
        interpolate: true,
        image_data: image.as_raw().clone(),
        image_filter: None,
        smask: None,
        clipping_bbox: None,
    }
}

/// Writes top to bottom, starting a new page when the content reaches the footer.
struct Pen<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    fonts: &'a Fonts,
    footer: String,
    y: f32,
    pages: usize,
}

impl Pen<'_> {
    fn reserve(&mut self, height: f32) -> bool {
        if self.y - height >= CONTENT_BOTTOM {
            return false;
        }
        self.footer();
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Report page {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT - TOP_MARGIN;
        true
    }

    fn footer(&self) {
        let size = 8.0;
        self.layer.set_fill_color(rgb(0x555555));
        self.layer.use_text(
            self.footer.as_str(),
            size,
            Mm(PAGE_WIDTH - SIDE_MARGIN - text_width(&self.footer, size)),
            Mm(BOTTOM_MARGIN - 3.5),
            &self.fonts.regular,
        );
        self.layer.set_fill_color(rgb(0x000000));
    }

    fn line(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        let height = size * PT_TO_MM * 1.2;
        self.reserve(height);
        self.y -= height;
        self.layer
            .use_text(text, size, Mm(SIDE_MARGIN), Mm(self.y), font);
    }

    fn paragraph(&mut self, text: &str, size: f32) {
        let fonts = self.fonts;
        for line in wrap(text, size, CONTENT_WIDTH) {
            self.line(&line, size, &fonts.regular);
        }
    }

    fn heading(&mut self, text: &str) {
        self.gap(2.0);
        // Keep the heading with at least one line of what follows.
        self.reserve(12.0 * PT_TO_MM * 1.2 + 10.0);
        let fonts = self.fonts;
        self.line(text, 12.0, &fonts.bold);
        self.gap(1.0);
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn rule(&mut self, color: Color, thickness: f32) {
        self.layer.set_outline_color(color);
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(SIDE_MARGIN), Mm(self.y)), false),
                (Point::new(Mm(PAGE_WIDTH - SIDE_MARGIN), Mm(self.y)), false),
            ],
            is_closed: false,
        });
    }

    /// Two images side by side, each half the content width at a 4:3 aspect.
    fn images(&mut self, images: [(&str, Option<&RgbImage>); 2]) {
        let size = 10.0;
        let column = CONTENT_WIDTH / 2.0;
        let width = column - 4.0;
        let height = width * IMAGE_ASPECT;
        let caption = size * PT_TO_MM * 1.6;
        self.reserve(caption + height + 2.0);

        self.y -= caption;
        let caption_y = self.y;
        self.y -= height + 2.0;
        for (index, (label, image)) in images.into_iter().enumerate() {
            let x = SIDE_MARGIN + index as f32 * column;
            self.layer
                .use_text(label, size, Mm(x), Mm(caption_y), &self.fonts.bold);
            match image {
                Some(image) => {
                    let natural_width = image.width() as f32 * 25.4 / IMAGE_DPI;
                    let natural_height = image.height() as f32 * 25.4 / IMAGE_DPI;
                    Image::from(image_xobject(image)).add_to_layer(
                        self.layer.clone(),
                        ImageTransform {
                            translate_x: Some(Mm(x)),
                            translate_y: Some(Mm(self.y)),
                            scale_x: Some(width / natural_width),
                            scale_y: Some(height / natural_height),
                            dpi: Some(IMAGE_DPI),
                            ..Default::default()
                        },
                    );
                }
                None => {
                    self.layer.use_text(
                        "Image unavailable",
                        size,
                        Mm(x),
                        Mm(self.y + height / 2.0),
                        &self.fonts.italic,
                    );
                }
            }
        }
    }

    fn table_header(&mut self, header: [&str; 2]) {
        let size = 10.0;
        let value_right = PAGE_WIDTH - SIDE_MARGIN - 2.0;
        self.layer.set_fill_color(rgb(0x2E5AAC));
        self.y -= size * PT_TO_MM * 1.8;
        self.layer
            .use_text(header[0], size, Mm(SIDE_MARGIN + 2.0), Mm(self.y), &self.fonts.bold);
        self.layer.use_text(
            header[1],
            size,
            Mm(value_right - text_width(header[1], size)),
            Mm(self.y),
            &self.fonts.bold,
        );
        self.gap(2.0);
        self.rule(rgb(0xC7CDDB), 0.75);
        self.layer.set_fill_color(rgb(0x000000));
    }

    /// Two-column table with right-aligned values. The header repeats on
    /// every page the table spans.
    fn table(&mut self, header: [&str; 2], rows: &[(String, String)]) {
        let size = 10.0;
        let value_right = PAGE_WIDTH - SIDE_MARGIN - 2.0;
        let row_height = size * PT_TO_MM * 1.8;

        self.reserve(2.0 * (row_height + 2.0));
        self.table_header(header);

        for (label, value) in rows {
            if self.reserve(row_height + 2.0) {
                self.table_header(header);
            }
            self.y -= row_height;
            self.layer
                .use_text(label.as_str(), size, Mm(SIDE_MARGIN + 2.0), Mm(self.y), &self.fonts.regular);
            self.layer.use_text(
                value.as_str(),
                size,
                Mm(value_right - text_width(value, size)),
                Mm(self.y),
                &self.fonts.regular,
            );
            self.gap(2.0);
            self.rule(rgb(0xE1E5EE), 0.25);
        }
    }
}

pub fn render(data: &ReportData) -> Result<Vec<u8>, ReportError> {
    let (doc, page, layer) =
        PdfDocument::new(TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Report page 1");
    let fonts = Fonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
        italic: doc
            .add_builtin_font(BuiltinFont::HelveticaOblique)
            .map_err(pdf_error)?,
    };
    let mut pen = Pen {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        fonts: &fonts,
        footer: format!("AI generated - {}", data.generated_at),
        y: PAGE_HEIGHT - TOP_MARGIN,
        pages: 1,
    };

    pen.line(TITLE, 20.0, &fonts.bold);
    pen.gap(1.0);
    pen.line(
        "Generated using AI-assisted retinal imaging analysis",
        10.0,
        &fonts.italic,
    );
    pen.gap(3.0);
    pen.line(&format!("Scan ID: {}", data.image_id), 10.0, &fonts.regular);
    pen.line(&format!("Generated: {}", data.generated_at), 10.0, &fonts.regular);
    pen.gap(4.0);

    pen.heading("Summary");
    pen.paragraph(&data.summary, 10.0);
    pen.heading("Recommendation");
    pen.paragraph(&data.recommendation, 10.0);

    pen.heading("Images");
    let input = load_embedded(data.input_image.as_deref());
    let mask = load_embedded(data.mask_image.as_deref());
    pen.images([("Input Scan", input.as_ref()), ("Segmentation Overlay", mask.as_ref())]);

    pen.heading("Disease Probability Analysis");
    let probability_rows: Vec<(String, String)> = data
        .probabilities
        .iter()
        .map(|(name, p)| (name.clone(), format!("{:.2}%", p * 100.0)))
        .collect();
    pen.table(["Disease", "Probability"], &probability_rows);

    pen.heading("Retinal Layer Thickness (um)");
    let thickness_rows: Vec<(String, String)> = data
        .layer_thickness
        .iter()
        .map(|(layer, value)| (layer.clone(), format!("{}", value)))
        .collect();
    pen.table(["Layer", "Thickness (um)"], &thickness_rows);

    pen.gap(6.0);
    for line in DISCLAIMER {
        pen.paragraph(line, 9.0);
    }
    pen.footer();
    log::debug!("Rendered report for {} on {} page(s)", data.image_id, pen.pages);

    doc.save_to_bytes().map_err(pdf_error)
}
