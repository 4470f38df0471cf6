use crate::services::gateway::{GenerationKind, GenerationRequest};

#[derive(Debug, Clone, Copy)]
pub struct FrameworkContext<'a> {
    pub main_title: &'a str,
    pub description: &'a str,
    pub page_count: usize,
    pub seed_characters: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct TitleContext<'a> {
    pub main_title: &'a str,
    pub all_titles: &'a [String],
    pub page_number: usize,
    pub current_title: &'a str,
    pub characters: &'a [String],
    pub current_description: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub main_title: &'a str,
    pub description: &'a str,
    pub all_titles: &'a [String],
    pub characters: &'a [String],
    pub current_title: &'a str,
    pub current_description: &'a str,
    pub previous_developments: Option<&'a str>,
    pub next_page_direction: Option<&'a str>,
}

/// Every instruction sent to the text model. Each variant spells out its
/// output format in full (labels, counts, "nothing else") so the parser
/// has something stable to latch onto.
#[derive(Debug, Clone, Copy)]
pub enum PromptOperation<'a> {
    Title {
        seed_title: Option<&'a str>,
        seed_description: Option<&'a str>,
    },
    Framework(FrameworkContext<'a>),
    StructuredFramework(FrameworkContext<'a>),
    RegenerateTitle(TitleContext<'a>),
    PageContent(PageContext<'a>),
}

impl PromptOperation<'_> {
    pub fn kind(&self) -> GenerationKind {
        match self {
            PromptOperation::Title { .. } => GenerationKind::Title,
            PromptOperation::Framework(_) | PromptOperation::StructuredFramework(_) => GenerationKind::Framework,
            PromptOperation::RegenerateTitle(_) => GenerationKind::TitleRegeneration,
            PromptOperation::PageContent(_) => GenerationKind::PageContent,
        }
    }

    pub fn build(&self) -> String {
        match self {
            PromptOperation::Title {
                seed_title,
                seed_description,
            } => title_prompt(*seed_title, *seed_description),
            PromptOperation::Framework(ctx) => framework_prompt(ctx),
            PromptOperation::StructuredFramework(ctx) => structured_framework_prompt(ctx),
            PromptOperation::RegenerateTitle(ctx) => regenerate_title_prompt(ctx),
            PromptOperation::PageContent(ctx) => page_content_prompt(ctx),
        }
    }

    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest::new(self.kind(), self.build())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn title_prompt(seed_title: Option<&str>, seed_description: Option<&str>) -> String {
    let mut seed = String::new();
    if let Some(title) = non_blank(seed_title) {
        seed.push_str(&format!("Use this working title as inspiration: {}\n", title));
    }
    if let Some(description) = non_blank(seed_description) {
        seed.push_str(&format!("Use this idea as inspiration: {}\n", description));
    }
    if seed.is_empty() {
        seed.push_str("Invent something original.\n");
    }

    format!(
        "Generate a random title for a comic along with a one-paragraph description.\n\
        {seed}\
        This is shown in an application, not a chat, so do not include any extra wording, \
        greetings or explanations.\n\
        Respond with exactly two lines and nothing else, strictly in this format:\n\
        Main Title: [Title]\n\
        Description: [Description]"
    )
}

fn framework_rules(ctx: &FrameworkContext<'_>) -> String {
    let mut rules = format!(
        "Create a comic book story framework titled \"{}\".\n\
        Description: {}\n\
        The story has exactly {} pages. The first pages should introduce the story and the \
        characters, and the last pages should be the climax and the resolution of the story \
        with high tension. The story should be a mixture of tension, drama, action and emotion \
        that fits the title and the description.\n\
        Write a detailed description for every page: what happens on that page and every \
        incident that takes place there, because it drives the generation of that page.\n\
        Page titles must follow the story order and match their page descriptions.\n",
        ctx.main_title, ctx.description, ctx.page_count
    );
    if !ctx.seed_characters.is_empty() {
        rules.push_str(&format!(
            "These characters must appear in the character list: {}\n",
            ctx.seed_characters.join(", ")
        ));
    }
    rules
}

fn framework_prompt(ctx: &FrameworkContext<'_>) -> String {
    let n = ctx.page_count;
    format!(
        "{}\
        This is shown in an application, not a chat, so do not include any extra wording.\n\
        Respond with exactly these three sections, in this order, and nothing else.\n\
        Characters:\n\
        1. [Character Name] - [Role/Description]\n\
        2. [Character Name] - [Role/Description]\n\
        --\n\
        Page Titles:\n\
        1. [Title 1]\n\
        2. [Title 2]\n\
        ...\n\
        {n}. [Title {n}]\n\
        --\n\
        Page Descriptions:\n\
        1. [Page Description 1]\n\
        2. [Page Description 2]\n\
        ...\n\
        {n}. [Page Description {n}]\n\
        Give exactly {n} page titles and exactly {n} page descriptions.",
        framework_rules(ctx)
    )
}

fn structured_framework_prompt(ctx: &FrameworkContext<'_>) -> String {
    let n = ctx.page_count;
    format!(
        "{}\
        Respond with a single JSON object and nothing else: no Markdown, no comments, \
        no text before or after it. Use exactly this shape:\n\
        {{\"characters\": [\"[Character Name] - [Role/Description]\"], \
        \"pages\": [{{\"pageTitle\": \"[Title]\", \"prompt\": \"[Page Description]\"}}]}}\n\
        The \"pages\" array must contain exactly {n} entries in story order.",
        framework_rules(ctx)
    )
}

fn regenerate_title_prompt(ctx: &TitleContext<'_>) -> String {
    format!(
        "The main title of the story is \"{}\". The story has {} pages and the titles of all \
        the pages are: {}.\n\
        Regenerate the title for page {}.\n\
        Current title: {}\n\
        Characters: {}\n\
        Current page description: {}\n\
        Keep the new title consistent with the rest of the story and the other titles.\n\
        Return ONLY the new page title text, with no quotes, labels or explanation.",
        ctx.main_title,
        ctx.all_titles.len(),
        ctx.all_titles.join(" | "),
        ctx.page_number,
        ctx.current_title,
        ctx.characters.join(", "),
        ctx.current_description
    )
}

fn page_content_prompt(ctx: &PageContext<'_>) -> String {
    format!(
        "You are a comic script generator. Generate the content for one page of a comic book, \
        keeping narrative continuity, engaging character interactions and the established tone \
        of the story. Do not include any explanations, introductions or extra text outside the \
        specified format.\n\
        \n\
        Comic story details:\n\
        - Title: {}\n\
        - Story overview: {}\n\
        - All page titles: {}\n\
        - Key characters: {}\n\
        \n\
        Page to generate:\n\
        - Current page title: {}\n\
        - Previous page summary: {}\n\
        - Current page direction: {}\n\
        - Current page description: {}\n\
        \n\
        Rules:\n\
        - Strictly follow the output format below, with the four sections in this order.\n\
        - Do not add any text, explanation or commentary outside the format.\n\
        - Maintain continuity with previous pages.\n\
        - Keep every character's dialogue true to their personality.\n\
        \n\
        Output format:\n\
        Page Content:\n\
        [Character 1]: \"Dialogue line 1\"\n\
        [Character 2]: \"Dialogue line 2\"\n\
        (5-15 dialogue lines, every line starts with the speaking character's name)\n\
        \n\
        Key Developments:\n\
        - [Important plot point 1]\n\
        - [Important plot point 2]\n\
        \n\
        Next Page Suggestions:\n\
        - [Possible next event 1]\n\
        - [Possible next event 2]\n\
        (2-3 ideas that build on this page)\n\
        \n\
        Image Prompts:\n\
        - [Visual description of panel 1]\n\
        - [Visual description of panel 2]\n\
        - [Visual description of panel 3]\n\
        - [Visual description of panel 4]\n\
        (4-5 detailed visual descriptions for comic panels)",
        ctx.main_title,
        ctx.description,
        ctx.all_titles.join(", "),
        ctx.characters.join(", "),
        ctx.current_title,
        non_blank(ctx.previous_developments).unwrap_or("None"),
        non_blank(ctx.next_page_direction).unwrap_or("Continue naturally"),
        ctx.current_description
    )
}
