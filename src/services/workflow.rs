use crate::core::error::{ParseError, StoryError, StoryResult};
use crate::core::io::{file_stem, Storage};
use crate::core::state::{CharacterRef, GenerationMode, Page, PanelImage, Phase, Story};
use crate::services::export::ComicDocument;
use crate::services::gateway::{GenerationGateway, GenerationRequest};
use crate::services::parser::{
    parse_framework, parse_framework_structured, parse_page_content, parse_regenerated_title, parse_title,
    PageSections, ParsedTitle, Section,
};
use crate::services::prompt::{FrameworkContext, PageContext, PromptOperation, TitleContext};
use crate::utils::text::strip_bullet;
use indicatif::ProgressBar;
use log::{info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_MAX_PAGES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameworkMode {
    #[default]
    Lines,
    Structured,
}

#[derive(Debug, Clone, Default)]
pub struct FrameworkRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub generate_title: bool,
    pub page_count: usize,
    pub seed_characters: Vec<String>,
    pub mode: FrameworkMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRunOutcome {
    Completed,
    /// A stop was requested; `next_page` is the first page left ungenerated.
    Stopped { next_page: usize },
}

fn describe_missing(missing: &[Section]) -> String {
    missing.iter().map(Section::to_string).collect::<Vec<_>>().join(", ")
}

/// Owns the story being authored and walks it through its phases. Every
/// mutation goes through here and a failed call leaves the story untouched.
pub struct StoryOrchestrator {
    gateway: GenerationGateway,
    story: Story,
    mode: GenerationMode,
    cursor: usize,
    max_pages: usize,
    stop: Arc<AtomicBool>,
}

impl StoryOrchestrator {
    pub fn new(gateway: GenerationGateway, max_pages: usize) -> Self {
        Self {
            gateway,
            story: Story::default(),
            mode: GenerationMode::Manual,
            cursor: 1,
            max_pages: max_pages.max(1),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn phase(&self) -> Phase {
        if self.story.pages.is_empty() {
            Phase::Empty
        } else if !self.story.titles_finalized {
            Phase::FrameworkGenerated
        } else if !self.story.generation_complete {
            Phase::TitlesFinalized(self.mode)
        } else {
            Phase::GenerationComplete
        }
    }

    /// Shared flag the UI sets to stop an auto run after the page in flight.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn require(&self, allowed: bool, operation: &str) -> StoryResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(StoryError::validation(format!(
                "cannot {} during {}",
                operation,
                self.phase()
            )))
        }
    }

    fn check_page(&self, index: usize) -> StoryResult<&Page> {
        self.story.page(index).ok_or_else(|| {
            StoryError::validation(format!(
                "page {} does not exist (story has {} pages)",
                index,
                self.story.pages.len()
            ))
        })
    }

    fn in_manual(&self) -> bool {
        self.phase() == Phase::TitlesFinalized(GenerationMode::Manual)
    }

    pub async fn synthesize_title(
        &self,
        seed_title: Option<&str>,
        seed_description: Option<&str>,
    ) -> StoryResult<ParsedTitle> {
        let request = PromptOperation::Title {
            seed_title,
            seed_description,
        }
        .to_request();
        let text = self.gateway.generate_text(&request).await?;
        let parsed = parse_title(&text).ok_or(ParseError::Empty("title"))?;
        if parsed.description.is_empty() {
            warn!("Title reply had no description: {:?}", text);
        }
        Ok(parsed)
    }

    pub async fn create_framework(&mut self, request: FrameworkRequest) -> StoryResult<&Story> {
        self.require(self.phase() == Phase::Empty, "create a framework")?;
        if request.page_count == 0 || request.page_count > self.max_pages {
            return Err(StoryError::validation(format!(
                "page count must be between 1 and {}, got {}",
                self.max_pages, request.page_count
            )));
        }

        let title = request.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let description = request.description.as_deref().map(str::trim).filter(|d| !d.is_empty());

        let (main_title, description) = if request.generate_title {
            let parsed = self.synthesize_title(title, description).await?;
            info!("Generated title: {}", parsed.main_title);
            (parsed.main_title, parsed.description)
        } else {
            let title = title.ok_or_else(|| StoryError::validation("a title is required unless one is generated"))?;
            let description =
                description.ok_or_else(|| StoryError::validation("a description is required unless one is generated"))?;
            (title.to_string(), description.to_string())
        };

        let context = FrameworkContext {
            main_title: &main_title,
            description: &description,
            page_count: request.page_count,
            seed_characters: &request.seed_characters,
        };
        let operation = match request.mode {
            FrameworkMode::Lines => PromptOperation::Framework(context),
            FrameworkMode::Structured => PromptOperation::StructuredFramework(context),
        };
        let text = self.gateway.generate_text(&operation.to_request()).await?;
        let sections = match request.mode {
            FrameworkMode::Lines => parse_framework(&text),
            FrameworkMode::Structured => parse_framework_structured(&text)?,
        };

        if !sections.missing_sections.is_empty() {
            warn!("Framework reply is missing: {}", describe_missing(&sections.missing_sections));
        }
        if sections.titles.is_empty() {
            return Err(ParseError::Empty("page titles").into());
        }
        if sections.titles.len() != request.page_count {
            warn!(
                "Asked for {} pages, the model returned {}",
                request.page_count,
                sections.titles.len()
            );
        }
        if sections.descriptions.len() < sections.titles.len() {
            warn!(
                "{} page(s) came back without a description",
                sections.titles.len() - sections.descriptions.len()
            );
        }

        let mut characters: Vec<CharacterRef> =
            sections.characters.iter().map(|line| CharacterRef::from_line(line)).collect();
        if characters.is_empty() {
            characters = request
                .seed_characters
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| CharacterRef::from_line(c))
                .collect();
        }

        let pages = sections
            .titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let description = sections.descriptions.get(i).cloned().unwrap_or_default();
                Page::new(i + 1, title.clone(), description)
            })
            .collect();

        self.story = Story {
            main_title,
            description,
            characters,
            pages,
            titles_finalized: false,
            generation_complete: false,
        };
        self.cursor = 1;
        info!(
            "Framework ready: {} pages, {} characters",
            self.story.pages.len(),
            self.story.characters.len()
        );
        Ok(&self.story)
    }

    pub fn edit_title(&mut self, index: usize, title: &str) -> StoryResult<()> {
        self.require(self.phase() == Phase::FrameworkGenerated, "edit a title")?;
        self.check_page(index)?;
        if let Some(page) = self.story.page_mut(index) {
            page.title = title.trim().to_string();
        }
        Ok(())
    }

    pub async fn regenerate_title(&mut self, index: usize) -> StoryResult<String> {
        self.require(self.phase() == Phase::FrameworkGenerated, "regenerate a title")?;
        let page = self.check_page(index)?;

        let all_titles = self.story.all_titles();
        let characters = self.story.character_labels();
        let request = PromptOperation::RegenerateTitle(TitleContext {
            main_title: &self.story.main_title,
            all_titles: &all_titles,
            page_number: index,
            current_title: &page.title,
            characters: &characters,
            current_description: &page.source_description,
        })
        .to_request();

        let text = self.gateway.generate_text(&request).await?;
        let title = parse_regenerated_title(&text).ok_or(ParseError::Empty("title"))?;
        if let Some(page) = self.story.page_mut(index) {
            info!("Page {} title: {:?} -> {:?}", index, page.title, title);
            page.title = title.clone();
        }
        Ok(title)
    }

    pub fn finalize_titles(&mut self, mode: GenerationMode) -> StoryResult<()> {
        self.require(self.phase() == Phase::FrameworkGenerated, "finalize titles")?;
        let blank: Vec<String> = self
            .story
            .pages
            .iter()
            .filter(|p| p.title.trim().is_empty())
            .map(|p| p.index.to_string())
            .collect();
        if !blank.is_empty() {
            return Err(StoryError::validation(format!(
                "every page needs a title before continuing (blank: {})",
                blank.join(", ")
            )));
        }

        self.story.titles_finalized = true;
        self.mode = mode;
        self.cursor = 1;
        info!("Titles finalized, {:?} mode", mode);
        Ok(())
    }

    /// 1-based index of the page manual mode is working on.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_page(&self) -> Option<&Page> {
        match self.phase() {
            Phase::TitlesFinalized(_) => self.story.page(self.cursor),
            _ => None,
        }
    }

    fn page_request(&self, index: usize) -> StoryResult<GenerationRequest> {
        let page = self.check_page(index)?;
        let previous = index.checked_sub(1).and_then(|i| self.story.page(i));
        let previous_developments = previous
            .map(|p| p.key_developments.join("\n"))
            .filter(|d| !d.trim().is_empty());
        let next_page_direction = previous.map(|p| p.next_suggestions.join("\n"));

        let all_titles = self.story.all_titles();
        let characters = self.story.character_labels();
        Ok(PromptOperation::PageContent(PageContext {
            main_title: &self.story.main_title,
            description: &self.story.description,
            all_titles: &all_titles,
            characters: &characters,
            current_title: &page.title,
            current_description: &page.source_description,
            previous_developments: previous_developments.as_deref(),
            next_page_direction: next_page_direction.as_deref(),
        })
        .to_request())
    }

    async fn generate_page(&self, index: usize) -> StoryResult<PageSections> {
        let request = self.page_request(index)?;
        let text = self.gateway.generate_text(&request).await?;
        let sections = parse_page_content(&text);
        if !sections.missing_sections.is_empty() {
            warn!(
                "Page {} reply is missing: {}",
                index,
                describe_missing(&sections.missing_sections)
            );
        }
        if sections.content.trim().is_empty() {
            return Err(ParseError::Empty("page content").into());
        }
        Ok(sections)
    }

    fn apply_page(&mut self, index: usize, sections: PageSections) {
        if let Some(page) = self.story.page_mut(index) {
            page.content = sections.content;
            page.key_developments = sections.key_developments;
            page.next_suggestions = sections.next_suggestions;
            page.image_prompts = sections.image_prompts;
            page.panels.clear();
        }
    }

    /// Generates the page under the cursor. A page that already has content
    /// is left alone.
    pub async fn generate_current_page(&mut self) -> StoryResult<&Page> {
        self.require(self.in_manual(), "generate a page")?;
        let index = self.cursor;
        if !self.check_page(index)?.has_content() {
            let sections = self.generate_page(index).await?;
            self.apply_page(index, sections);
            info!("Page {} generated", index);
        }
        self.check_page(index)
    }

    pub async fn regenerate_current_page(&mut self) -> StoryResult<&Page> {
        self.require(self.in_manual(), "regenerate a page")?;
        let index = self.cursor;
        self.check_page(index)?;
        let sections = self.generate_page(index).await?;
        self.apply_page(index, sections);
        info!("Page {} regenerated", index);
        self.check_page(index)
    }

    pub fn edit_current_content(&mut self, content: &str) -> StoryResult<()> {
        self.require(self.in_manual(), "edit page content")?;
        let index = self.cursor;
        self.check_page(index)?;
        if let Some(page) = self.story.page_mut(index) {
            page.content = content.trim_end().to_string();
        }
        Ok(())
    }

    pub fn previous_page(&mut self) -> StoryResult<usize> {
        self.require(self.in_manual(), "go back a page")?;
        if self.cursor <= 1 {
            return Err(StoryError::validation("already on the first page"));
        }
        self.cursor -= 1;
        Ok(self.cursor)
    }

    /// Moves to the next page. Leaving the last page finishes the story once
    /// every page has content.
    pub fn advance(&mut self) -> StoryResult<Phase> {
        self.require(self.in_manual(), "advance")?;
        let page = self.check_page(self.cursor)?;
        if !page.has_content() {
            return Err(StoryError::validation(format!(
                "page {} has no content yet",
                page.index
            )));
        }

        if self.cursor < self.story.pages.len() {
            self.cursor += 1;
        } else if let Some(missing) = self.story.first_page_without_content() {
            return Err(StoryError::validation(format!(
                "page {} still has no content",
                missing
            )));
        } else {
            self.story.generation_complete = true;
            info!("All {} pages generated", self.story.pages.len());
        }
        Ok(self.phase())
    }

    pub fn switch_mode(&mut self, mode: GenerationMode) -> StoryResult<()> {
        self.require(matches!(self.phase(), Phase::TitlesFinalized(_)), "switch mode")?;
        if mode == GenerationMode::Manual {
            self.cursor = self.story.first_page_without_content().unwrap_or(self.cursor);
        }
        self.mode = mode;
        info!("Switched to {:?} mode", mode);
        Ok(())
    }

    /// Generates every page still missing content, in order. Stops at the
    /// first failure and keeps what was already generated.
    pub async fn run_auto(&mut self, pb: &ProgressBar) -> StoryResult<AutoRunOutcome> {
        self.require(
            self.phase() == Phase::TitlesFinalized(GenerationMode::Auto),
            "run auto generation",
        )?;
        self.stop.store(false, Ordering::SeqCst);

        let total = self.story.pages.len();
        pb.set_length(total as u64);
        pb.set_position(self.story.pages.iter().filter(|p| p.has_content()).count() as u64);

        for index in 1..=total {
            if self.story.page(index).is_some_and(Page::has_content) {
                continue;
            }
            if self.stop.load(Ordering::SeqCst) {
                info!("Auto run stopped before page {}", index);
                pb.abandon_with_message(format!("Stopped before page {}", index));
                return Ok(AutoRunOutcome::Stopped { next_page: index });
            }

            self.cursor = index;
            if let Some(page) = self.story.page(index) {
                pb.set_message(format!("Page {}: {}", index, page.title));
            }
            match self.generate_page(index).await {
                Ok(sections) => {
                    self.apply_page(index, sections);
                    pb.inc(1);
                }
                Err(e) => {
                    warn!("Auto run failed on page {}: {}", index, e);
                    pb.abandon_with_message(format!("Page {} failed", index));
                    return Err(StoryError::PageFailed {
                        page: index,
                        source: Box::new(e),
                    });
                }
            }
        }

        self.story.generation_complete = true;
        pb.finish_with_message("Generation complete");
        info!("All {} pages generated", total);
        Ok(AutoRunOutcome::Completed)
    }

    /// Renders one image per image prompt of `index` and writes them under
    /// `folder`. A failure stops the remaining panels; written ones are kept.
    ///
    /// Also allowed after generation is complete. `panels` is the only field
    /// it touches; page content, titles and the phase stay as they are.
    pub async fn generate_panel_images(
        &mut self,
        index: usize,
        storage: &dyn Storage,
        folder: &str,
    ) -> StoryResult<usize> {
        self.require(
            matches!(self.phase(), Phase::TitlesFinalized(_) | Phase::GenerationComplete),
            "generate panel images",
        )?;
        let prompts = self.check_page(index)?.image_prompts.clone();
        if prompts.is_empty() {
            return Err(StoryError::validation(format!(
                "page {} has no image prompts",
                index
            )));
        }

        let dir = Path::new(folder).join(file_stem(&self.story.main_title));
        let mut written = 0;
        for (i, raw) in prompts.iter().enumerate() {
            let number = i + 1;
            let prompt = strip_bullet(raw);
            let bytes = self.gateway.generate_image(prompt).await?;

            let path = dir
                .join(format!("page_{:02}_panel_{}.png", index, number))
                .to_string_lossy()
                .to_string();
            storage.write(&path, &bytes).await.map_err(StoryError::Storage)?;
            info!("Panel {} of page {} saved to {}", number, index, path);

            if let Some(page) = self.story.page_mut(index) {
                page.panels.retain(|p| p.number != number);
                page.panels.push(PanelImage {
                    number,
                    prompt: prompt.to_string(),
                    path,
                });
                page.panels.sort_by_key(|p| p.number);
            }
            written += 1;
        }
        Ok(written)
    }

    pub fn export_document(&self) -> StoryResult<ComicDocument> {
        self.require(self.phase() == Phase::GenerationComplete, "export")?;
        Ok(ComicDocument::from_story(&self.story))
    }

    pub fn reset(&mut self) {
        self.story = Story::default();
        self.mode = GenerationMode::Manual;
        self.cursor = 1;
        self.stop.store(false, Ordering::SeqCst);
        info!("Story reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::image::ImageClient;
    use crate::services::llm::{GenerationOptions, LlmClient};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // Replies are handed out in order; an `Err` entry simulates a failed call.
    #[derive(Debug, Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Arc<Mutex<Vec<String>>>,
        stop_after_call: Option<Arc<AtomicBool>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(stop) = &self.stop_after_call {
                stop.store(true, Ordering::SeqCst);
            }
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no scripted reply left")),
            }
        }
    }

    #[derive(Debug)]
    struct FlakyImage {
        fail_on_call: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ImageClient for FlakyImage {
        async fn txt2img(&self, _prompt: &str) -> Result<Vec<u8>> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == self.fail_on_call {
                Err(anyhow!("txt2img error (500): out of memory"))
            } else {
                Ok(vec![0x89, b'P', b'N', b'G'])
            }
        }
    }

    fn orchestrator(llm: ScriptedLlm) -> StoryOrchestrator {
        let image = FlakyImage {
            fail_on_call: usize::MAX,
            calls: Mutex::new(0),
        };
        StoryOrchestrator::new(GenerationGateway::new(Box::new(llm), Box::new(image)), DEFAULT_MAX_PAGES)
    }

    fn framework(count: usize) -> String {
        let mut text = String::from("Characters:\n1. Mira - a pilot\n2. Odo - an android\n--\nPage Titles:\n");
        for i in 1..=count {
            text.push_str(&format!("{}. Title {}\n", i, i));
        }
        text.push_str("--\nPage Descriptions:\n");
        for i in 1..=count {
            text.push_str(&format!("{}. Description {}\n", i, i));
        }
        text
    }

    fn page_reply(n: usize) -> String {
        format!(
            "Page Content:\nMira: \"Line {n}\"\nOdo: \"Reply {n}\"\n\nKey Developments:\n- Development {n}\n\n\
            Next Page Suggestions:\n- Suggestion {n}\n\nImage Prompts:\n- Panel A of {n}\n- Panel B of {n}"
        )
    }

    fn request(count: usize) -> FrameworkRequest {
        FrameworkRequest {
            title: Some("Neon Harbor".to_string()),
            description: Some("A smuggler's last job.".to_string()),
            page_count: count,
            ..Default::default()
        }
    }

    async fn finalized(count: usize, mode: GenerationMode, mut pages: Vec<Result<String, String>>) -> StoryOrchestrator {
        let mut replies = vec![Ok(framework(count))];
        replies.append(&mut pages);
        let mut orch = orchestrator(ScriptedLlm::new(replies));
        orch.create_framework(request(count)).await.unwrap();
        orch.finalize_titles(mode).unwrap();
        orch
    }

    #[tokio::test]
    async fn test_create_framework_builds_pages() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![Ok(framework(3))]));
        assert_eq!(orch.phase(), Phase::Empty);

        let story = orch.create_framework(request(3)).await.unwrap();
        assert_eq!(story.pages.len(), 3);
        assert_eq!(story.pages[2].index, 3);
        assert_eq!(story.pages[2].source_description, "Description 3");
        assert_eq!(story.characters[1], CharacterRef::new("Odo", "an android"));
        assert_eq!(orch.phase(), Phase::FrameworkGenerated);
    }

    #[tokio::test]
    async fn test_create_framework_validation() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![]));
        let err = orch.create_framework(request(0)).await.unwrap_err();
        assert!(matches!(err, StoryError::Validation(_)));
        let err = orch.create_framework(request(11)).await.unwrap_err();
        assert!(matches!(err, StoryError::Validation(_)));

        let no_description = FrameworkRequest {
            description: None,
            ..request(3)
        };
        assert!(matches!(
            orch.create_framework(no_description).await.unwrap_err(),
            StoryError::Validation(_)
        ));
        assert_eq!(orch.phase(), Phase::Empty);
    }

    #[tokio::test]
    async fn test_framework_without_titles_is_soft_failure() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![
            Ok("I cannot help with that.".to_string()),
            Ok(framework(2)),
        ]));
        let err = orch.create_framework(request(2)).await.unwrap_err();
        assert!(matches!(err, StoryError::Parse(ParseError::Empty(_))));
        assert_eq!(orch.phase(), Phase::Empty);

        orch.create_framework(request(2)).await.unwrap();
        assert_eq!(orch.phase(), Phase::FrameworkGenerated);
    }

    #[tokio::test]
    async fn test_missing_descriptions_default_to_empty() {
        let text = "Page Titles:\n1. One\n2. Two\n--\nPage Descriptions:\n1. Only one";
        let mut orch = orchestrator(ScriptedLlm::new(vec![Ok(text.to_string())]));
        let story = orch.create_framework(request(2)).await.unwrap();
        assert_eq!(story.pages[1].source_description, "");
        assert!(story.characters.is_empty());
    }

    #[tokio::test]
    async fn test_seed_characters_fill_in_when_none_parsed() {
        let text = "Page Titles:\n1. One";
        let mut orch = orchestrator(ScriptedLlm::new(vec![Ok(text.to_string())]));
        let story = orch
            .create_framework(FrameworkRequest {
                seed_characters: vec!["Vega - captain".to_string()],
                ..request(1)
            })
            .await
            .unwrap();
        assert_eq!(story.characters, vec![CharacterRef::new("Vega", "captain")]);
    }

    #[tokio::test]
    async fn test_finalize_rejects_blank_titles() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![Ok(framework(2))]));
        orch.create_framework(request(2)).await.unwrap();
        orch.edit_title(2, "   ").unwrap();

        let err = orch.finalize_titles(GenerationMode::Manual).unwrap_err();
        assert!(err.to_string().contains("blank: 2"));
        assert_eq!(orch.phase(), Phase::FrameworkGenerated);

        orch.edit_title(2, "The Chase").unwrap();
        orch.finalize_titles(GenerationMode::Manual).unwrap();
        assert_eq!(orch.phase(), Phase::TitlesFinalized(GenerationMode::Manual));
        assert!(orch.edit_title(1, "Too late").is_err());
    }

    #[tokio::test]
    async fn test_regenerate_title_failure_keeps_title() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![Ok(framework(2)), Ok("\n  \n".to_string())]));
        orch.create_framework(request(2)).await.unwrap();
        let err = orch.regenerate_title(1).await.unwrap_err();
        assert!(matches!(err, StoryError::Parse(_)));
        assert_eq!(orch.story().pages[0].title, "Title 1");
        assert!(orch.regenerate_title(5).await.is_err());
    }

    #[tokio::test]
    async fn test_manual_flow_to_completion() {
        let mut orch = finalized(2, GenerationMode::Manual, vec![Ok(page_reply(1)), Ok(page_reply(2))]).await;

        let err = orch.advance().unwrap_err();
        assert!(err.to_string().contains("no content"));
        assert!(orch.previous_page().is_err());

        orch.generate_current_page().await.unwrap();
        assert_eq!(orch.advance().unwrap(), Phase::TitlesFinalized(GenerationMode::Manual));
        assert_eq!(orch.cursor(), 2);

        orch.generate_current_page().await.unwrap();
        assert_eq!(orch.advance().unwrap(), Phase::GenerationComplete);
        assert!(orch.export_document().is_ok());
    }

    #[tokio::test]
    async fn test_generate_current_page_is_noop_with_content() {
        let llm = ScriptedLlm::new(vec![Ok(framework(1)), Ok(page_reply(1))]);
        let prompts = llm.prompts.clone();
        let mut orch = orchestrator(llm);
        orch.create_framework(request(1)).await.unwrap();
        orch.finalize_titles(GenerationMode::Manual).unwrap();

        orch.generate_current_page().await.unwrap();
        orch.generate_current_page().await.unwrap();
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_failure_leaves_page_untouched() {
        let mut orch = finalized(1, GenerationMode::Manual, vec![Ok(page_reply(1)), Err("timeout".to_string())]).await;
        orch.generate_current_page().await.unwrap();
        let before = orch.story().pages[0].clone();

        let err = orch.regenerate_current_page().await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
        assert_eq!(orch.story().pages[0], before);
    }

    #[tokio::test]
    async fn test_edit_content_and_navigation() {
        let mut orch = finalized(2, GenerationMode::Manual, vec![Ok(page_reply(1))]).await;
        orch.generate_current_page().await.unwrap();
        orch.edit_current_content("Mira: \"Edited.\"\n\n").unwrap();
        assert_eq!(orch.current_page().unwrap().content, "Mira: \"Edited.\"");

        orch.advance().unwrap();
        assert_eq!(orch.previous_page().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_context_comes_from_previous_page() {
        let llm = ScriptedLlm::new(vec![Ok(framework(2)), Ok(page_reply(1)), Ok(page_reply(2))]);
        let prompts = llm.prompts.clone();
        let mut orch = orchestrator(llm);
        orch.create_framework(request(2)).await.unwrap();
        orch.finalize_titles(GenerationMode::Auto).unwrap();

        let outcome = orch.run_auto(&ProgressBar::hidden()).await.unwrap();
        assert_eq!(outcome, AutoRunOutcome::Completed);

        let prompts = prompts.lock().unwrap();
        assert!(prompts[1].contains("Previous page summary: None"));
        assert!(prompts[2].contains("Previous page summary: - Development 1"));
        assert!(prompts[2].contains("Current page direction: - Suggestion 1"));
    }

    #[tokio::test]
    async fn test_auto_failure_then_manual_recovery() {
        let mut orch = finalized(
            3,
            GenerationMode::Auto,
            vec![Ok(page_reply(1)), Err("503 Service Unavailable".to_string()), Ok(page_reply(2))],
        )
        .await;

        let err = orch.run_auto(&ProgressBar::hidden()).await.unwrap_err();
        assert_eq!(err.failed_page(), Some(2));
        assert_eq!(orch.phase(), Phase::TitlesFinalized(GenerationMode::Auto));
        assert!(orch.story().pages[0].has_content());
        assert!(!orch.story().pages[1].has_content());

        orch.switch_mode(GenerationMode::Manual).unwrap();
        assert_eq!(orch.cursor(), 2);
        orch.generate_current_page().await.unwrap();
        assert!(orch.story().pages[1].content.contains("Line 2"));
    }

    #[tokio::test]
    async fn test_stop_request_finishes_current_page() {
        let mut orch = finalized(3, GenerationMode::Auto, vec![]).await;
        let stop = orch.stop_handle();
        let llm = ScriptedLlm {
            stop_after_call: Some(stop),
            ..ScriptedLlm::new(vec![Ok(page_reply(1)), Ok(page_reply(2))])
        };
        orch.gateway = GenerationGateway::new(
            Box::new(llm),
            Box::new(FlakyImage {
                fail_on_call: usize::MAX,
                calls: Mutex::new(0),
            }),
        );

        let outcome = orch.run_auto(&ProgressBar::hidden()).await.unwrap();
        assert_eq!(outcome, AutoRunOutcome::Stopped { next_page: 2 });
        assert!(orch.story().pages[0].has_content());
        assert!(!orch.story().pages[1].has_content());
    }

    #[tokio::test]
    async fn test_wrong_phase_calls_are_rejected() {
        let mut orch = orchestrator(ScriptedLlm::new(vec![]));
        assert!(matches!(orch.advance().unwrap_err(), StoryError::Validation(_)));
        assert!(matches!(orch.finalize_titles(GenerationMode::Auto).unwrap_err(), StoryError::Validation(_)));
        assert!(orch.export_document().is_err());
        assert!(orch.run_auto(&ProgressBar::hidden()).await.is_err());
        assert_eq!(orch.phase(), Phase::Empty);
    }

    #[tokio::test]
    async fn test_panel_images_written_and_partial_failure_kept() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let folder = temp_dir.path().to_string_lossy().to_string();
        let mut orch = finalized(1, GenerationMode::Manual, vec![Ok(page_reply(1))]).await;
        orch.generate_current_page().await.unwrap();
        orch.gateway = GenerationGateway::new(
            Box::new(ScriptedLlm::default()),
            Box::new(FlakyImage {
                fail_on_call: 2,
                calls: Mutex::new(0),
            }),
        );

        let storage = NativeStorage::new();
        let err = orch.generate_panel_images(1, &storage, &folder).await.unwrap_err();
        assert!(matches!(err, StoryError::Gateway(_)));

        let panels = &orch.story().pages[0].panels;
        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].prompt, "Panel A of 1");
        assert!(panels[0].path.ends_with("page_01_panel_1.png"));
        assert!(temp_dir.path().join("Neon_Harbor").join("page_01_panel_1.png").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_panel_images_after_completion_only_touch_panels() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let folder = temp_dir.path().to_string_lossy().to_string();
        let mut orch = finalized(1, GenerationMode::Manual, vec![Ok(page_reply(1))]).await;
        orch.generate_current_page().await.unwrap();
        orch.advance().unwrap();
        assert_eq!(orch.phase(), Phase::GenerationComplete);
        let before = orch.story().clone();

        assert_eq!(orch.generate_panel_images(1, &NativeStorage::new(), &folder).await.unwrap(), 2);

        assert_eq!(orch.phase(), Phase::GenerationComplete);
        let mut expected = before;
        expected.pages[0].panels = orch.story().pages[0].panels.clone();
        assert_eq!(orch.story(), &expected);
        assert_eq!(expected.pages[0].panels.len(), 2);
        assert!(orch.export_document().is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_from_any_phase() {
        let mut orch = finalized(1, GenerationMode::Auto, vec![]).await;
        orch.reset();
        assert_eq!(orch.phase(), Phase::Empty);
        assert!(orch.story().pages.is_empty());
    }
}
