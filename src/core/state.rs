use std::fmt;

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct CharacterRef {
    pub name: String,
    pub role_description: String, // free text, whatever the model wrote after the name
}

impl CharacterRef {
    pub fn new(name: impl Into<String>, role_description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role_description: role_description.into(),
        }
    }

    /// Splits a framework line such as `Mira - a retired pilot` on the first
    /// separator. Without a separator the whole line is the name.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        for sep in [" - ", " – ", " — ", ": "] {
            if let Some((name, role)) = line.split_once(sep) {
                let name = name.trim().trim_matches('*').trim();
                if !name.is_empty() {
                    return Self::new(name, role.trim());
                }
            }
        }
        Self::new(line, "")
    }

    pub fn label(&self) -> String {
        if self.role_description.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, self.role_description)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelImage {
    pub number: usize,
    pub prompt: String,
    pub path: String,
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub title: String,
    pub source_description: String,
    pub content: String,
    pub key_developments: Vec<String>,
    pub next_suggestions: Vec<String>,
    pub image_prompts: Vec<String>,
    pub panels: Vec<PanelImage>,
}

impl Page {
    pub fn new(index: usize, title: impl Into<String>, source_description: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            source_description: source_description.into(),
            ..Default::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationMode {
    Manual,
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Empty,
    FrameworkGenerated,
    TitlesFinalized(GenerationMode),
    GenerationComplete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Empty => f.write_str("no story"),
            Phase::FrameworkGenerated => f.write_str("editing titles"),
            Phase::TitlesFinalized(GenerationMode::Manual) => f.write_str("manual page generation"),
            Phase::TitlesFinalized(GenerationMode::Auto) => f.write_str("auto page generation"),
            Phase::GenerationComplete => f.write_str("generation complete"),
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Story {
    pub main_title: String,
    pub description: String,
    pub characters: Vec<CharacterRef>,
    pub pages: Vec<Page>,
    pub titles_finalized: bool,
    pub generation_complete: bool,
}

impl Story {
    pub fn all_titles(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.title.clone()).collect()
    }

    pub fn character_labels(&self) -> Vec<String> {
        self.characters.iter().map(CharacterRef::label).collect()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        index.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    pub fn page_mut(&mut self, index: usize) -> Option<&mut Page> {
        index.checked_sub(1).and_then(move |i| self.pages.get_mut(i))
    }

    pub fn first_page_without_content(&self) -> Option<usize> {
        self.pages.iter().find(|p| !p.has_content()).map(|p| p.index)
    }
}
