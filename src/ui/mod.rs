use crate::core::config::Config;
use crate::core::error::StoryError;
use crate::core::io::Storage;
use crate::core::state::{GenerationMode, Page, Phase};
use crate::services::export::export_pdf;
use crate::services::workflow::{AutoRunOutcome, FrameworkMode, FrameworkRequest, StoryOrchestrator};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::validator::Validation;
use inquire::{Confirm, CustomType, CustomUserError, Select, Text};
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    EditTitle,
    RegenerateTitle,
    StartManual,
    StartAuto,
    Generate,
    Regenerate,
    EditLine,
    Next,
    Previous,
    PanelImages,
    SwitchToAuto,
    SwitchToManual,
    ResumeAuto,
    ExportPdf,
    StartOver,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::EditTitle => "Edit a page title",
            Action::RegenerateTitle => "Regenerate a page title",
            Action::StartManual => "Continue: generate pages one by one",
            Action::StartAuto => "Continue: generate all pages automatically",
            Action::Generate => "Generate this page",
            Action::Regenerate => "Regenerate this page",
            Action::EditLine => "Edit a line of this page",
            Action::Next => "Next page",
            Action::Previous => "Previous page",
            Action::PanelImages => "Generate panel images",
            Action::SwitchToAuto => "Switch to automatic generation",
            Action::SwitchToManual => "Switch to page-by-page generation",
            Action::ResumeAuto => "Resume automatic generation",
            Action::ExportPdf => "Export PDF",
            Action::StartOver => "Start a new comic",
            Action::Quit => "Quit",
        };
        f.write_str(label)
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    pb
}

fn report(err: &StoryError) {
    println!("\n{}", err);
    if matches!(err, StoryError::Gateway(_) | StoryError::Parse(_) | StoryError::PageFailed { .. }) {
        println!("You can try again.");
    }
}

fn print_page(page: &Page, total: usize) {
    println!("\n=== Page {}/{}: {} ===", page.index, total, page.title);
    if !page.source_description.is_empty() {
        println!("({})", page.source_description);
    }
    if page.has_content() {
        println!("\n{}", page.content);
        if !page.key_developments.is_empty() {
            println!("\nKey developments:");
            for item in &page.key_developments {
                println!("  {}", item);
            }
        }
        for panel in &page.panels {
            println!("  panel {}: {}", panel.number, panel.path);
        }
    } else {
        println!("\n(not generated yet)");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    StopAfterPage,
    Exit,
}

// The first Ctrl-C during an auto run asks it to stop; any other press exits.
fn on_interrupt(auto_active: &AtomicBool, stop: &AtomicBool) -> Interrupt {
    if auto_active.load(Ordering::SeqCst) && !stop.swap(true, Ordering::SeqCst) {
        Interrupt::StopAfterPage
    } else {
        Interrupt::Exit
    }
}

/// Interactive terminal front end. Drives the orchestrator one phase at a
/// time and turns every recoverable error into a message.
pub struct TerminalApp {
    config: Config,
    orchestrator: StoryOrchestrator,
    storage: Arc<dyn Storage>,
    auto_active: Arc<AtomicBool>,
}

impl TerminalApp {
    pub fn new(config: Config, orchestrator: StoryOrchestrator, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            orchestrator,
            storage,
            auto_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        // Listening for ctrl_c replaces the default SIGINT handling for the
        // whole process, so one watcher covers every phase.
        let auto_active = self.auto_active.clone();
        let stop = self.orchestrator.stop_handle();
        let watcher = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match on_interrupt(&auto_active, &stop) {
                    Interrupt::StopAfterPage => {
                        println!("\nStopping after the current page. Press Ctrl-C again to quit now.")
                    }
                    Interrupt::Exit => std::process::exit(130),
                }
            }
        });
        let result = self.menu_loop().await;
        watcher.abort();
        result
    }

    async fn menu_loop(&mut self) -> Result<()> {
        loop {
            let phase = self.orchestrator.phase();
            debug!("UI step in phase: {}", phase);
            let keep_going = match phase {
                Phase::Empty => self.start_story().await?,
                Phase::FrameworkGenerated => self.review_titles().await?,
                Phase::TitlesFinalized(GenerationMode::Manual) => self.manual_step().await?,
                Phase::TitlesFinalized(GenerationMode::Auto) => self.auto_run().await?,
                Phase::GenerationComplete => self.finish().await?,
            };
            if !keep_going {
                println!("Bye.");
                return Ok(());
            }
        }
    }

    fn choose(&self, prompt: &str, actions: Vec<Action>) -> Result<Action> {
        Ok(Select::new(prompt, actions).prompt_skippable()?.unwrap_or(Action::Quit))
    }

    fn choose_page(&self, prompt: &str, pages: &[&Page]) -> Result<usize> {
        let options: Vec<String> = pages.iter().map(|p| format!("{}. {}", p.index, p.title)).collect();
        let choice = Select::new(prompt, options).raw_prompt()?;
        Ok(pages[choice.index].index)
    }

    async fn start_story(&mut self) -> Result<bool> {
        let request = if self.config.unattended {
            FrameworkRequest {
                generate_title: true,
                page_count: self.config.default_pages,
                ..Default::default()
            }
        } else {
            match self.ask_framework_request()? {
                Some(request) => request,
                None => return Ok(false),
            }
        };

        let pb = spinner("Writing the story framework...");
        let result = self.orchestrator.create_framework(request).await;
        pb.finish_and_clear();

        match result {
            Ok(story) => {
                println!("\n{}\n{}\n", story.main_title, story.description);
                if !story.characters.is_empty() {
                    println!("Characters:");
                    for character in &story.characters {
                        println!("  {}", character.label());
                    }
                }
                Ok(true)
            }
            Err(e) if self.config.unattended => Err(e.into()),
            Err(e) => {
                report(&e);
                Ok(Confirm::new("Try again?").with_default(true).prompt()?)
            }
        }
    }

    fn ask_framework_request(&self) -> Result<Option<FrameworkRequest>> {
        let Some(generate_title) = Confirm::new("Generate a title and description for you?")
            .with_default(false)
            .prompt_skippable()?
        else {
            return Ok(None);
        };

        let (title, description) = if generate_title {
            let idea = Text::new("Any idea to steer it? (optional)").prompt()?;
            (None, Some(idea))
        } else {
            let title = Text::new("Comic title:")
                .with_validator(inquire::required!("A title is required"))
                .prompt()?;
            let description = Text::new("Short description:")
                .with_validator(inquire::required!("A description is required"))
                .prompt()?;
            (Some(title), Some(description))
        };

        let max = self.orchestrator.max_pages();
        let page_count = CustomType::<usize>::new("How many pages?")
            .with_default(self.config.default_pages.min(max))
            .with_error_message("Please type a number")
            .with_validator(move |n: &usize| -> Result<Validation, CustomUserError> {
                if (1..=max).contains(n) {
                    Ok(Validation::Valid)
                } else {
                    Ok(Validation::Invalid(format!("Choose between 1 and {}", max).into()))
                }
            })
            .prompt()?;

        let characters = Text::new("Characters that must appear (comma separated, optional):").prompt()?;
        let seed_characters = characters
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let mode = Select::new("Framework format:", vec!["Numbered lists", "JSON"]).prompt()?;
        let mode = if mode == "JSON" {
            FrameworkMode::Structured
        } else {
            FrameworkMode::Lines
        };

        Ok(Some(FrameworkRequest {
            title,
            description,
            generate_title,
            page_count,
            seed_characters,
            mode,
        }))
    }

    async fn review_titles(&mut self) -> Result<bool> {
        let story = self.orchestrator.story();
        println!("\nPage titles for \"{}\":", story.main_title);
        for page in &story.pages {
            println!("  {}. {}", page.index, page.title);
        }

        if self.config.unattended {
            self.orchestrator.finalize_titles(GenerationMode::Auto)?;
            return Ok(true);
        }

        let action = self.choose(
            "What next?",
            vec![
                Action::StartManual,
                Action::StartAuto,
                Action::EditTitle,
                Action::RegenerateTitle,
                Action::StartOver,
                Action::Quit,
            ],
        )?;

        let result = match action {
            Action::EditTitle => {
                let pages: Vec<&Page> = self.orchestrator.story().pages.iter().collect();
                let index = self.choose_page("Which page?", &pages)?;
                let current = pages[index - 1].title.clone();
                let title = Text::new("New title:").with_initial_value(&current).prompt()?;
                self.orchestrator.edit_title(index, &title)
            }
            Action::RegenerateTitle => {
                let pages: Vec<&Page> = self.orchestrator.story().pages.iter().collect();
                let index = self.choose_page("Which page?", &pages)?;
                let pb = spinner("Thinking of a new title...");
                let result = self.orchestrator.regenerate_title(index).await;
                pb.finish_and_clear();
                result.map(|title| println!("Page {} is now \"{}\"", index, title))
            }
            Action::StartManual => self.orchestrator.finalize_titles(GenerationMode::Manual),
            Action::StartAuto => self.orchestrator.finalize_titles(GenerationMode::Auto),
            Action::StartOver => {
                self.orchestrator.reset();
                Ok(())
            }
            _ => return Ok(false),
        };
        if let Err(e) = result {
            report(&e);
        }
        Ok(true)
    }

    async fn manual_step(&mut self) -> Result<bool> {
        let total = self.orchestrator.story().pages.len();
        let Some(page) = self.orchestrator.current_page() else {
            return Ok(false);
        };
        print_page(page, total);

        let mut actions = Vec::new();
        if page.has_content() {
            actions.push(Action::Next);
            actions.push(Action::Regenerate);
            actions.push(Action::EditLine);
            if !page.image_prompts.is_empty() {
                actions.push(Action::PanelImages);
            }
        } else {
            actions.push(Action::Generate);
        }
        if page.index > 1 {
            actions.push(Action::Previous);
        }
        actions.extend([Action::SwitchToAuto, Action::StartOver, Action::Quit]);
        let index = page.index;

        let action = self.choose("What next?", actions)?;
        let result = match action {
            Action::Generate | Action::Regenerate => {
                let pb = spinner(&format!("Writing page {}...", index));
                let result = if action == Action::Generate {
                    self.orchestrator.generate_current_page().await.map(|_| ())
                } else {
                    self.orchestrator.regenerate_current_page().await.map(|_| ())
                };
                pb.finish_and_clear();
                result
            }
            Action::EditLine => self.edit_line(),
            Action::Next => self.orchestrator.advance().map(|_| ()),
            Action::Previous => self.orchestrator.previous_page().map(|_| ()),
            Action::PanelImages => self.panel_images(index).await,
            Action::SwitchToAuto => self.orchestrator.switch_mode(GenerationMode::Auto),
            Action::StartOver => {
                self.orchestrator.reset();
                Ok(())
            }
            _ => return Ok(false),
        };
        if let Err(e) = result {
            report(&e);
        }
        Ok(true)
    }

    fn edit_line(&mut self) -> Result<(), StoryError> {
        let Some(page) = self.orchestrator.current_page() else {
            return Ok(());
        };
        let mut lines: Vec<String> = page.content.lines().map(str::to_string).collect();
        let choices: Vec<String> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| format!("{:>3} | {}", i + 1, l))
            .collect();
        if choices.is_empty() {
            return Ok(());
        }

        let picked = Select::new("Which line?", choices)
            .prompt()
            .map_err(|e| StoryError::validation(e.to_string()))?;
        let line_no: usize = picked
            .split('|')
            .next()
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| StoryError::validation("could not read the selected line"))?;
        let edited = Text::new("Line:")
            .with_initial_value(&lines[line_no - 1])
            .prompt()
            .map_err(|e| StoryError::validation(e.to_string()))?;

        lines[line_no - 1] = edited;
        self.orchestrator.edit_current_content(&lines.join("\n"))
    }

    async fn panel_images(&mut self, index: usize) -> Result<(), StoryError> {
        let pb = spinner(&format!("Drawing panels for page {}...", index));
        let result = self
            .orchestrator
            .generate_panel_images(index, self.storage.as_ref(), &self.config.output_folder)
            .await;
        pb.finish_and_clear();
        let count = result?;
        println!("{} panel(s) saved for page {}", count, index);
        Ok(())
    }

    async fn auto_run(&mut self) -> Result<bool> {
        let pb = ProgressBar::new(self.orchestrator.story().pages.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        if !self.config.unattended {
            println!("Press Ctrl-C to stop after the page being written.");
        }

        self.auto_active.store(true, Ordering::SeqCst);
        let result = self.orchestrator.run_auto(&pb).await;
        self.auto_active.store(false, Ordering::SeqCst);

        let options = match result {
            Ok(AutoRunOutcome::Completed) => return Ok(true),
            Ok(AutoRunOutcome::Stopped { next_page }) => {
                println!("Stopped. Page {} is next.", next_page);
                vec![Action::ResumeAuto, Action::SwitchToManual, Action::StartOver, Action::Quit]
            }
            Err(e) if self.config.unattended => return Err(e.into()),
            Err(e) => {
                report(&e);
                vec![Action::ResumeAuto, Action::SwitchToManual, Action::StartOver, Action::Quit]
            }
        };

        match self.choose("What next?", options)? {
            Action::ResumeAuto => {}
            Action::SwitchToManual => self.orchestrator.switch_mode(GenerationMode::Manual)?,
            Action::StartOver => self.orchestrator.reset(),
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn export(&self) -> Result<(), StoryError> {
        let document = self.orchestrator.export_document()?;
        let path = export_pdf(&document, self.storage.as_ref(), &self.config.output_folder).await?;
        println!("Saved {}", path);
        Ok(())
    }

    async fn finish(&mut self) -> Result<bool> {
        if self.config.unattended {
            self.export().await?;
            return Ok(false);
        }

        let story = self.orchestrator.story();
        println!("\nAll {} pages of \"{}\" are written.", story.pages.len(), story.main_title);
        let action = self.choose(
            "What next?",
            vec![Action::ExportPdf, Action::PanelImages, Action::StartOver, Action::Quit],
        )?;
        let result = match action {
            Action::ExportPdf => self.export().await,
            Action::PanelImages => {
                let pages: Vec<&Page> = self
                    .orchestrator
                    .story()
                    .pages
                    .iter()
                    .filter(|p| !p.image_prompts.is_empty())
                    .collect();
                if pages.is_empty() {
                    println!("No page has image prompts.");
                    return Ok(true);
                }
                let index = self.choose_page("Which page?", &pages)?;
                self.panel_images(index).await
            }
            Action::StartOver => {
                self.orchestrator.reset();
                Ok(())
            }
            _ => return Ok(false),
        };
        if let Err(e) = result {
            report(&e);
        }
        Ok(true)
    }
}
