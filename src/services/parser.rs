use crate::core::error::ParseError;
use crate::utils::text::strip_code_blocks;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

// "1. item", never "2.5 hours later"
static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\.\s+(.+)$").expect("numbered line pattern is valid"));

/// A section the parser expected but found nothing under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Characters,
    PageTitles,
    PageDescriptions,
    PageContent,
    KeyDevelopments,
    NextSuggestions,
    ImagePrompts,
}

impl Section {
    fn header(self) -> &'static str {
        match self {
            Section::Characters => "characters:",
            Section::PageTitles => "page titles:",
            Section::PageDescriptions => "page descriptions:",
            Section::PageContent => "page content",
            Section::KeyDevelopments => "key developments",
            Section::NextSuggestions => "next page suggestions",
            Section::ImagePrompts => "image prompts",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header().trim_end_matches(':'))
    }
}

const FRAMEWORK_SECTIONS: [Section; 3] = [Section::Characters, Section::PageTitles, Section::PageDescriptions];
const PAGE_SECTIONS: [Section; 4] = [
    Section::PageContent,
    Section::KeyDevelopments,
    Section::NextSuggestions,
    Section::ImagePrompts,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkSections {
    pub characters: Vec<String>,
    pub titles: Vec<String>,
    pub descriptions: Vec<String>,
    pub missing_sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSections {
    pub content: String,
    pub key_developments: Vec<String>,
    pub next_suggestions: Vec<String>,
    pub image_prompts: Vec<String>,
    pub missing_sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub main_title: String,
    pub description: String,
}

fn detect_header(line: &str, candidates: &[Section]) -> Option<Section> {
    let lower = line.to_lowercase();
    candidates.iter().copied().find(|s| lower.contains(s.header()))
}

fn is_terminator(line: &str) -> bool {
    line.trim_start().starts_with("--")
}

/// Parses the three-section framework reply. Unknown lines are dropped and a
/// reply without any headers yields empty lists instead of an error.
pub fn parse_framework(text: &str) -> FrameworkSections {
    let mut sections = FrameworkSections::default();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(header) = detect_header(line, &FRAMEWORK_SECTIONS) {
            current = Some(header);
            continue;
        }
        if is_terminator(line) {
            current = None;
            continue;
        }
        let Some(section) = current else { continue };
        let Some(caps) = NUMBERED_LINE.captures(line) else { continue };
        let item = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        if item.is_empty() {
            continue;
        }

        match section {
            Section::Characters => sections.characters.push(item),
            Section::PageTitles => sections.titles.push(item),
            Section::PageDescriptions => sections.descriptions.push(item),
            _ => {}
        }
    }

    sections.missing_sections = FRAMEWORK_SECTIONS
        .iter()
        .copied()
        .filter(|s| match s {
            Section::Characters => sections.characters.is_empty(),
            Section::PageTitles => sections.titles.is_empty(),
            _ => sections.descriptions.is_empty(),
        })
        .collect();
    sections
}

#[derive(Deserialize)]
struct StructuredFramework {
    #[serde(default)]
    characters: Vec<String>,
    pages: Vec<StructuredPage>,
}

#[derive(Deserialize)]
struct StructuredPage {
    #[serde(rename = "pageTitle")]
    page_title: String,
    #[serde(default)]
    prompt: String,
}

/// Parses the JSON framework reply. Unlike line mode this is strict: a reply
/// that does not deserialize is an error, never a silent fallback.
pub fn parse_framework_structured(text: &str) -> Result<FrameworkSections, ParseError> {
    let json = strip_code_blocks(text);
    let parsed: StructuredFramework =
        serde_json::from_str(&json).map_err(|e| ParseError::InvalidStructure(e.to_string()))?;

    let mut sections = FrameworkSections {
        characters: parsed.characters.into_iter().map(|c| c.trim().to_string()).collect(),
        ..Default::default()
    };
    for page in parsed.pages {
        sections.titles.push(page.page_title.trim().to_string());
        sections.descriptions.push(page.prompt.trim().to_string());
    }
    if sections.characters.is_empty() {
        sections.missing_sections.push(Section::Characters);
    }
    if sections.titles.is_empty() {
        sections.missing_sections.push(Section::PageTitles);
        sections.missing_sections.push(Section::PageDescriptions);
    }
    debug!(
        "structured framework: {} characters, {} pages",
        sections.characters.len(),
        sections.titles.len()
    );
    Ok(sections)
}

/// Parses a page reply into its four sections. Bulleted lines are kept as
/// written (trimmed) and the dialogue block keeps its blank lines.
pub fn parse_page_content(text: &str) -> PageSections {
    let mut sections = PageSections::default();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(header) = detect_header(line, &PAGE_SECTIONS) {
            current = Some(header);
            continue;
        }
        if is_terminator(line) {
            current = None;
            continue;
        }
        match current {
            Some(Section::PageContent) => {
                sections.content.push_str(line);
                sections.content.push('\n');
            }
            Some(list) if !line.trim().is_empty() => {
                let item = line.trim().to_string();
                match list {
                    Section::KeyDevelopments => sections.key_developments.push(item),
                    Section::NextSuggestions => sections.next_suggestions.push(item),
                    Section::ImagePrompts => sections.image_prompts.push(item),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    let content_len = sections.content.trim_end().len();
    sections.content.truncate(content_len);

    sections.missing_sections = PAGE_SECTIONS
        .iter()
        .copied()
        .filter(|s| match s {
            Section::PageContent => sections.content.trim().is_empty(),
            Section::KeyDevelopments => sections.key_developments.is_empty(),
            Section::NextSuggestions => sections.next_suggestions.is_empty(),
            _ => sections.image_prompts.is_empty(),
        })
        .collect();
    sections
}

fn strip_label<'a>(line: &'a str, labels: &[&str]) -> &'a str {
    for label in labels {
        if line.get(..label.len()).is_some_and(|p| p.eq_ignore_ascii_case(label)) {
            return line[label.len()..].trim();
        }
    }
    line
}

const TITLE_LABELS: [&str; 2] = ["main title:", "title:"];

/// Splits a title synthesis reply into title and description. Quotes and
/// Markdown bold are removed before the labels are stripped. A labeled title
/// line wins over any preamble in front of it.
pub fn parse_title(text: &str) -> Option<ParsedTitle> {
    let cleaned = text.replace('"', "").replace("**", "");
    let lines: Vec<&str> = cleaned.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines
        .iter()
        .position(|l| strip_label(l, &TITLE_LABELS).len() != l.len())
        .unwrap_or(0);
    let mut lines = lines[start..].iter().copied();

    let main_title = strip_label(lines.next()?, &TITLE_LABELS).to_string();
    if main_title.is_empty() {
        return None;
    }
    let description = lines
        .map(|l| strip_label(l, &["description:"]))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(ParsedTitle { main_title, description })
}

pub fn parse_regenerated_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.replace("**", "");
    let title = strip_label(line.trim(), &["new title:", "title:"])
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201C}' || c == '\u{201D}')
        .trim();
    (!title.is_empty()).then(|| title.to_string())
}
