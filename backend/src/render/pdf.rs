//! Local PDF layout.
//!
//! The substituted template text is laid out line by line: blank lines become
//! breaks, `- ` lines become bullet items, `**bold**`, `*italic*` and
//! `***both***` markers as well as `<b>`/`<i>` tags style runs of text.
//! Envelope lines are not printed: the metadata sets the document title and
//! the watermark is repeated in every page header.

use super::{enveloped_body, RenderRequest, Renderer};
use crate::error::RenderError;
use crate::template::envelope::{self, EnvelopeLine};
use crate::template::TemplateModel;
use async_trait::async_trait;
use common::model::options::{OutputFormat, OutputOptions, Quality};
use genpdf::elements::{Break, LinearLayout, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::Document;
use std::path::PathBuf;

const MARGIN_MM: u8 = 10;
const FALLBACK_FAMILY: &str = "LiberationSans";

#[derive(Debug, Clone)]
pub struct PdfRenderer {
    fonts_dir: PathBuf,
    font_family: String,
}

impl PdfRenderer {
    pub fn new(fonts_dir: impl Into<PathBuf>, font_family: impl Into<String>) -> Self {
        Self {
            fonts_dir: fonts_dir.into(),
            font_family: font_family.into(),
        }
    }

    fn load_font(&self) -> Result<FontFamily<FontData>, RenderError> {
        if let Ok(family) = genpdf::fonts::from_files(&self.fonts_dir, &self.font_family, None) {
            return Ok(family);
        }
        genpdf::fonts::from_files(&self.fonts_dir, FALLBACK_FAMILY, None).map_err(|e| {
            RenderError::Template(format!(
                "font family '{}' not found in {}: {}",
                self.font_family,
                self.fonts_dir.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl Renderer for PdfRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let text = String::from_utf8(enveloped_body(request)?)
            .map_err(|e| RenderError::Record(format!("substituted text is not UTF-8: {}", e)))?;
        let quality = request.options.quality;
        let renderer = self.clone();
        tokio::task::spawn_blocking(move || {
            let font = renderer.load_font()?;
            layout(font, &text, quality)
        })
        .await
        .map_err(|e| RenderError::Record(format!("PDF layout task failed: {}", e)))?
    }

    fn supports(&self, template: &TemplateModel, options: &OutputOptions) -> Result<(), String> {
        if template.media_type().is_binary() {
            return Err(format!(
                "{} templates cannot be laid out locally",
                template.media_type().extension()
            ));
        }
        if options.format != OutputFormat::Pdf {
            return Err(format!("PDF renderer cannot produce {:?}", options.format));
        }
        if options.password.is_some() {
            return Err("password protection needs the upstream renderer".to_string());
        }
        Ok(())
    }
}

fn font_size(quality: Quality) -> u8 {
    // 11px body text at 0.75pt per px, one step up or down per quality level.
    let base = (11.0_f32 * 0.75_f32).round() as u8;
    match quality {
        Quality::Low => base - 1,
        Quality::Medium => base,
        Quality::High => base + 1,
    }
}

fn layout(font: FontFamily<FontData>, text: &str, quality: Quality) -> Result<Vec<u8>, RenderError> {
    let mut title = String::from("Generated document");
    let mut watermark: Option<String> = None;
    let mut content: Vec<&str> = Vec::new();
    for line in text.lines() {
        match envelope::parse_line(line) {
            Some(EnvelopeLine::Metadata(meta)) => {
                title = format!("{} #{}", meta.template_name, meta.row_index);
            }
            Some(EnvelopeLine::Watermark(w)) => watermark = Some(w),
            None => content.push(line),
        }
    }

    let mut doc = Document::new(font);
    doc.set_title(title);
    doc.set_font_size(font_size(quality));
    doc.set_line_spacing(1.0f64);

    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(MARGIN_MM);
    if let Some(text) = watermark {
        decorator.set_header(move |_page| {
            let mut header = Paragraph::new(StyledString::new(
                text.clone(),
                Style::new().italic().with_font_size(7),
            ));
            header.set_alignment(genpdf::Alignment::Center);
            header
        });
    }
    doc.set_page_decorator(decorator);

    if content.is_empty() {
        doc.push(Paragraph::new(""));
    }
    for line in content {
        if line.trim().is_empty() {
            doc.push(Break::new(1));
        } else if let Some(item) = line.strip_prefix("- ") {
            handle_list_item(&mut doc, item);
        } else if line.contains("<b>") || line.contains("<i>") {
            doc.push(parse_tagged_paragraph(line));
        } else {
            handle_normal_line(&mut doc, line);
        }
    }

    let mut out = Vec::new();
    doc.render(&mut out)
        .map_err(|e| RenderError::Record(format!("PDF rendering failed: {}", e)))?;
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TextStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

#[derive(Debug, PartialEq)]
struct TextSegment {
    text: String,
    style: TextStyle,
}

impl TextSegment {
    fn styled(&self) -> StyledString {
        let style = match self.style {
            TextStyle::Regular => Style::new(),
            TextStyle::Bold => Style::new().bold(),
            TextStyle::Italic => Style::new().italic(),
            TextStyle::BoldItalic => Style::new().bold().italic(),
        };
        StyledString::new(self.text.clone(), style)
    }
}

/// Split `***x***`, `**x**` and `*x*` runs. An unmatched marker is literal.
fn parse_styles(line: &str) -> Vec<TextSegment> {
    const MARKERS: [(&str, TextStyle); 3] = [
        ("***", TextStyle::BoldItalic),
        ("**", TextStyle::Bold),
        ("*", TextStyle::Italic),
    ];

    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut rest = line;
    'outer: while !rest.is_empty() {
        if rest.starts_with('*') {
            for (marker, style) in MARKERS {
                let Some(after) = rest.strip_prefix(marker) else {
                    continue;
                };
                if let Some(end) = after.find(marker) {
                    if end > 0 {
                        if !plain.is_empty() {
                            segments.push(TextSegment {
                                text: std::mem::take(&mut plain),
                                style: TextStyle::Regular,
                            });
                        }
                        segments.push(TextSegment {
                            text: after[..end].to_string(),
                            style,
                        });
                        rest = &after[end + marker.len()..];
                        continue 'outer;
                    }
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            plain.push(c);
        }
        rest = chars.as_str();
    }
    if !plain.is_empty() {
        segments.push(TextSegment {
            text: plain,
            style: TextStyle::Regular,
        });
    }
    segments
}

fn handle_list_item(doc: &mut Document, item_text: &str) {
    let mut p = Paragraph::new("");
    p.push(StyledString::new("• ", Style::new()));
    for seg in parse_styles(item_text) {
        p.push(seg.styled());
    }
    let mut layout = LinearLayout::vertical();
    layout.push(p);
    doc.push(layout);
}

fn handle_normal_line(doc: &mut Document, line: &str) {
    let mut p = Paragraph::new("");
    for seg in parse_styles(line) {
        p.push(seg.styled());
    }
    doc.push(p);
}

fn find_next_tag(text: &str) -> Option<(&'static str, &'static str, TextStyle, usize)> {
    let b = text.find("<b>").map(|i| ("<b>", "</b>", TextStyle::Bold, i));
    let i = text.find("<i>").map(|i| ("<i>", "</i>", TextStyle::Italic, i));
    match (b, i) {
        (Some(b), Some(i)) => Some(if b.3 < i.3 { b } else { i }),
        (b, i) => b.or(i),
    }
}

/// `<b>` and `<i>` tags on one line; a missing closing tag leaves the rest plain.
fn parse_tagged_paragraph(text: &str) -> Paragraph {
    let mut paragraph = Paragraph::new("");
    let mut rest = text;

    while let Some((open, close, style, start)) = find_next_tag(rest) {
        if start > 0 {
            paragraph.push(&rest[..start]);
        }
        let inner = &rest[start + open.len()..];
        match inner.find(close) {
            Some(end) => {
                let seg = TextSegment {
                    text: inner[..end].to_string(),
                    style,
                };
                paragraph.push(seg.styled());
                rest = &inner[end + close.len()..];
            }
            None => {
                paragraph.push(&rest[start..]);
                return paragraph;
            }
        }
    }
    if !rest.is_empty() {
        paragraph.push(rest);
    }
    paragraph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styles(line: &str) -> Vec<(String, TextStyle)> {
        parse_styles(line)
            .into_iter()
            .map(|s| (s.text, s.style))
            .collect()
    }

    #[test]
    fn parses_nested_markers() {
        assert_eq!(
            styles("a **b** *c* ***d***"),
            vec![
                ("a ".to_string(), TextStyle::Regular),
                ("b".to_string(), TextStyle::Bold),
                (" ".to_string(), TextStyle::Regular),
                ("c".to_string(), TextStyle::Italic),
                (" ".to_string(), TextStyle::Regular),
                ("d".to_string(), TextStyle::BoldItalic),
            ]
        );
    }

    #[test]
    fn unmatched_marker_is_literal() {
        assert_eq!(
            styles("5 * 3 = 15"),
            vec![("5 * 3 = 15".to_string(), TextStyle::Regular)]
        );
    }

    #[test]
    fn quality_scales_font_size() {
        assert!(font_size(Quality::Low) < font_size(Quality::High));
        assert_eq!(font_size(Quality::Medium), 8);
    }

    #[test]
    fn missing_fonts_are_a_template_error() {
        let renderer = PdfRenderer::new("/nonexistent/fonts", "Nope");
        assert!(matches!(
            renderer.load_font(),
            Err(RenderError::Template(_))
        ));
    }
}
