// ABOUTME: Text/code/markdown composer holding the draft and deciding the outbound content kind.
// ABOUTME: Detects a lone fenced code block and markdown structure with pulldown-cmark.

use crate::message::ContentKind;
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_CODE_LANGUAGE: &str = "python";

/// Content ready to hand to the send path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub content: String,
    pub kind: ContentKind,
    pub code_language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Composer {
    draft: String,
    kind: ContentKind,
    code_language: String,
    code_editor_open: bool,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LANGUAGE)
    }
}

impl Composer {
    pub fn new(code_language: impl Into<String>) -> Self {
        Self {
            draft: String::new(),
            kind: ContentKind::Text,
            code_language: code_language.into(),
            code_editor_open: false,
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn clear(&mut self) {
        self.draft.clear();
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Only the composable kinds are accepted; others are ignored
    pub fn set_kind(&mut self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Text | ContentKind::Markdown => {
                self.kind = kind;
                self.code_editor_open = false;
                true
            }
            ContentKind::Code => {
                self.kind = kind;
                self.code_editor_open = true;
                true
            }
            _ => false,
        }
    }

    pub fn code_language(&self) -> &str {
        &self.code_language
    }

    pub fn set_code_language(&mut self, language: impl Into<String>) {
        self.code_language = language.into();
    }

    pub fn is_code_editor_open(&self) -> bool {
        self.code_editor_open
    }

    /// Switch between the code editor and plain text. Returns the new state.
    pub fn toggle_code_editor(&mut self) -> bool {
        if self.code_editor_open {
            self.set_kind(ContentKind::Text);
        } else {
            self.set_kind(ContentKind::Code);
        }
        self.code_editor_open
    }

    /// Resolve the draft into outbound content. None when the draft is blank.
    pub fn compose(&self) -> Option<ComposedMessage> {
        if self.draft.trim().is_empty() {
            return None;
        }
        let composed = match self.kind {
            ContentKind::Code => ComposedMessage {
                content: self.draft.clone(),
                kind: ContentKind::Code,
                code_language: Some(self.code_language.clone()),
            },
            ContentKind::Markdown => ComposedMessage {
                content: self.draft.clone(),
                kind: ContentKind::Markdown,
                code_language: None,
            },
            _ => classify(&self.draft),
        };
        Some(composed)
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\A```([A-Za-z0-9_+#.-]*)[ \t]*\r?\n(.*?)\r?\n?```\z").ok())
        .as_ref()
}

/// Decide the kind of free text typed into the plain composer
pub fn classify(text: &str) -> ComposedMessage {
    let trimmed = text.trim();
    if let Some(caps) = fence_pattern().and_then(|p| p.captures(trimmed)) {
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if !body.contains("```") {
            let language = caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            return ComposedMessage {
                content: body.to_string(),
                kind: ContentKind::Code,
                code_language: language,
            };
        }
    }

    let kind = if has_markdown_structure(trimmed) {
        ContentKind::Markdown
    } else {
        ContentKind::Text
    };
    ComposedMessage {
        content: text.to_string(),
        kind,
        code_language: None,
    }
}

/// True when the text renders to anything richer than plain paragraphs
pub fn has_markdown_structure(text: &str) -> bool {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    Parser::new_ext(text, options).any(|event| match event {
        Event::Start(tag) => matches!(
            tag,
            Tag::Heading { .. }
                | Tag::List(_)
                | Tag::Emphasis
                | Tag::Strong
                | Tag::Strikethrough
                | Tag::Link { .. }
                | Tag::BlockQuote(_)
                | Tag::CodeBlock(_)
                | Tag::Table(_)
        ),
        Event::Code(_) => true,
        _ => false,
    })
}
