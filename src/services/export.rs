use crate::core::error::{StoryError, StoryResult};
use crate::core::io::{file_stem, Storage};
use crate::core::state::Story;
use crate::utils::text::{to_pdf_safe, wrap_line};
use log::info;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use std::path::Path;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const WRAP_CHARS: usize = 80;
const TITLE_WRAP_CHARS: usize = 40;

/// Read-only view of a finished story, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicDocument {
    pub title: String,
    pub description: String,
    pub pages: Vec<DocumentPage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPage {
    pub index: usize,
    pub title: String,
    pub content: String,
}

impl ComicDocument {
    pub fn from_story(story: &Story) -> Self {
        let mut pages: Vec<DocumentPage> = story
            .pages
            .iter()
            .map(|p| DocumentPage {
                index: p.index,
                title: p.title.clone(),
                content: p.content.clone(),
            })
            .collect();
        pages.sort_by_key(|p| p.index);
        Self {
            title: story.main_title.clone(),
            description: story.description.clone(),
            pages,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_comic.pdf", file_stem(&self.title))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Speaker,
    Body,
}

impl LineStyle {
    fn size(self) -> f32 {
        match self {
            LineStyle::Title => 24.0,
            LineStyle::Heading => 16.0,
            LineStyle::Speaker | LineStyle::Body => 11.0,
        }
    }

    fn line_height(self) -> f32 {
        match self {
            LineStyle::Title => 11.0,
            LineStyle::Heading => 9.0,
            LineStyle::Speaker | LineStyle::Body => 5.5,
        }
    }

    fn bold(self) -> bool {
        !matches!(self, LineStyle::Body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaidLine {
    pub text: String,
    pub style: LineStyle,
    pub y_mm: f32,
}

/// Positions text on A4 pages, top to bottom, starting a new sheet when the
/// bottom margin is reached.
#[derive(Debug, Default)]
struct Layout {
    sheets: Vec<Vec<LaidLine>>,
    y: f32,
}

impl Layout {
    fn new_sheet(&mut self) {
        self.sheets.push(Vec::new());
        self.y = PAGE_HEIGHT_MM - MARGIN_MM;
    }

    fn push(&mut self, text: String, style: LineStyle) {
        let height = style.line_height();
        if self.sheets.is_empty() || self.y - height < MARGIN_MM {
            self.new_sheet();
        }
        self.y -= height;
        let y_mm = self.y;
        if let Some(sheet) = self.sheets.last_mut() {
            sheet.push(LaidLine { text, style, y_mm });
        }
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn paragraph(&mut self, text: &str, style: LineStyle, width: usize) {
        for line in wrap_line(text, width) {
            self.push(line, style);
        }
    }
}

/// Lays the document out: a title sheet, then one sheet (or more, on
/// overflow) per story page. Lines ending in `:` are speaker cues.
pub fn layout(document: &ComicDocument) -> Vec<Vec<LaidLine>> {
    let mut layout = Layout::default();

    layout.new_sheet();
    layout.gap(60.0);
    layout.paragraph(&to_pdf_safe(&document.title), LineStyle::Title, TITLE_WRAP_CHARS);
    if !document.description.trim().is_empty() {
        layout.gap(8.0);
        layout.paragraph(&to_pdf_safe(&document.description.replace("**", "")), LineStyle::Body, WRAP_CHARS);
    }

    for page in &document.pages {
        layout.new_sheet();
        let heading = to_pdf_safe(&format!("Page {}: {}", page.index, page.title));
        layout.paragraph(&heading, LineStyle::Heading, TITLE_WRAP_CHARS + 15);
        layout.gap(4.0);

        for raw in page.content.lines() {
            let line = to_pdf_safe(&raw.replace("**", ""));
            let line = line.trim_end();
            if line.trim().is_empty() {
                layout.gap(LineStyle::Body.line_height() / 2.0);
                continue;
            }
            let style = if line.ends_with(':') {
                LineStyle::Speaker
            } else {
                LineStyle::Body
            };
            layout.paragraph(line, style, WRAP_CHARS);
        }
    }

    layout.sheets
}

pub fn render_pdf(document: &ComicDocument) -> StoryResult<Vec<u8>> {
    let sheets = layout(document);
    let title = to_pdf_safe(&document.title);
    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");

    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| StoryError::Export(format!("{:?}", e)))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| StoryError::Export(format!("{:?}", e)))?;

    for (i, sheet) in sheets.iter().enumerate() {
        let (page, layer) = if i == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1")
        };
        let layer = doc.get_page(page).get_layer(layer);
        for line in sheet {
            let font: &IndirectFontRef = if line.style.bold() { &bold } else { &regular };
            layer.use_text(
                line.text.as_str(),
                line.style.size(),
                Mm(MARGIN_MM),
                Mm(line.y_mm),
                font,
            );
        }
    }

    doc.save_to_bytes()
        .map_err(|e| StoryError::Export(format!("{:?}", e)))
}

/// Renders the document and writes it to `{folder}/{title}_comic.pdf`.
pub async fn export_pdf(document: &ComicDocument, storage: &dyn Storage, folder: &str) -> StoryResult<String> {
    let bytes = render_pdf(document)?;
    let path = Path::new(folder)
        .join(document.file_name())
        .to_string_lossy()
        .to_string();
    storage.write(&path, &bytes).await.map_err(StoryError::Storage)?;
    info!("Exported {} pages to {}", document.pages.len(), path);
    Ok(path)
}
