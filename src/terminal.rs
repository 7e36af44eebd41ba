// ABOUTME: Line-oriented terminal front end driving a ChatEngine
// ABOUTME: Reads stdin lines, applies engine events and prints what changed

use crate::commands::{parse_line, ChatCommand, ParseResult, HELP};
use crate::render::{format_message, format_notice};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tutorchat_core::capabilities::LocalFile;
use tutorchat_core::keymap::parse_chord;
use tutorchat_core::search::SearchFilter;
use tutorchat_core::{ChatEngine, ContentKind};

/// What the loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit { end_session: bool },
}

pub struct ChatShell<W: Write> {
    engine: ChatEngine,
    out: W,
    /// Last rendering of each message id, so only changes are reprinted
    shown: HashMap<String, String>,
    seen_revision: Option<u64>,
    seen_draft: String,
    was_typing: bool,
    metrics: Option<PrometheusHandle>,
}

impl<W: Write> ChatShell<W> {
    pub fn new(engine: ChatEngine, out: W) -> Self {
        Self {
            engine,
            out,
            shown: HashMap::new(),
            seen_revision: None,
            seen_draft: String::new(),
            was_typing: false,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ChatEngine {
        &mut self.engine
    }

    pub fn into_parts(self) -> (ChatEngine, W) {
        (self.engine, self.out)
    }

    fn agent_name(&self) -> String {
        self.engine
            .session()
            .map(|s| s.agent.name.clone())
            .unwrap_or_else(|| "agent".to_string())
    }

    fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        writeln!(self.out, "{}", text.as_ref()).context("Failed to write to terminal")
    }

    /// Print new or changed messages, notices, typing and transcribed drafts
    pub fn refresh(&mut self) -> Result<()> {
        let revision = self.engine.store().revision();
        if self.seen_revision != Some(revision) && !self.engine.is_search_active() {
            self.seen_revision = Some(revision);
            let agent = self.agent_name();
            let mut lines = Vec::new();
            for message in self.engine.store().iter() {
                let rendered = format_message(message, &agent);
                if self.shown.get(&message.id) != Some(&rendered) {
                    self.shown.insert(message.id.clone(), rendered.clone());
                    lines.push(rendered);
                }
            }
            for line in lines {
                self.say(line)?;
            }
        }

        for notice in self.engine.drain_notices() {
            self.say(format_notice(&notice))?;
        }

        let typing = self.engine.is_typing();
        if typing && !self.was_typing {
            let who: Vec<&str> = self.engine.typing_senders().collect();
            let line = format!("  ({} typing...)", who.join(", "));
            self.say(line)?;
        }
        self.was_typing = typing;

        let draft = self.engine.composer().draft().to_string();
        if draft != self.seen_draft {
            if !draft.is_empty() && !self.engine.composer().is_code_editor_open() {
                self.say(format!("  draft: {}  (!send to send)", draft))?;
            }
            self.seen_draft = draft;
        }

        self.out.flush().context("Failed to flush terminal")
    }

    /// Handle one line of user input
    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match parse_line(line) {
            ParseResult::Ignore => {}
            ParseResult::Message(text) => {
                if self.engine.composer().is_code_editor_open() {
                    let mut draft = self.engine.composer().draft().to_string();
                    if !draft.is_empty() {
                        draft.push('\n');
                    }
                    draft.push_str(&text);
                    self.engine.composer_mut().set_draft(draft.clone());
                    self.seen_draft = draft;
                } else {
                    self.engine.composer_mut().set_draft(text);
                    self.submit()?;
                }
            }
            ParseResult::Command(command) => return self.run_command(command.as_chat()),
        }
        Ok(Flow::Continue)
    }

    fn submit(&mut self) -> Result<()> {
        if let Err(rejected) = self.engine.submit_composer() {
            self.say(format!("! Not sent: {}", rejected))?;
        }
        self.seen_draft = self.engine.composer().draft().to_string();
        Ok(())
    }

    fn run_command(&mut self, command: ChatCommand) -> Result<Flow> {
        match command {
            ChatCommand::ToggleSearch => {
                if self.engine.is_search_active() {
                    self.close_search()?;
                } else {
                    self.engine.set_search_filter(SearchFilter::new(""));
                    self.say("Search open. !search <text> to filter, !close to return.")?;
                }
            }
            ChatCommand::Search(query) => {
                if self.engine.is_search_active() {
                    self.engine.set_search_query(&query);
                } else {
                    self.engine.set_search_filter(SearchFilter::new(query));
                }
                self.print_results()?;
            }
            ChatCommand::SearchKinds(kinds) => {
                let query = self
                    .engine
                    .search_filter()
                    .map(|f| f.query.clone())
                    .unwrap_or_default();
                self.engine
                    .set_search_filter(SearchFilter::new(query).with_kinds(&kinds));
                self.print_results()?;
            }
            ChatCommand::CloseSearch => self.close_search()?,
            ChatCommand::ToggleCode { language } => {
                if let Some(language) = language {
                    self.engine.composer_mut().set_code_language(language);
                    if !self.engine.composer().is_code_editor_open() {
                        self.engine.composer_mut().toggle_code_editor();
                    }
                } else {
                    self.engine.composer_mut().toggle_code_editor();
                }
                if self.engine.composer().is_code_editor_open() {
                    let language = self.engine.composer().code_language().to_string();
                    self.say(format!("Code editor ({}). Type lines, then !send.", language))?;
                } else {
                    self.say("Code editor closed.")?;
                }
            }
            ChatCommand::Markdown => {
                self.engine.composer_mut().set_kind(ContentKind::Markdown);
                self.say("Next message is markdown.")?;
            }
            ChatCommand::Send => self.submit()?,
            ChatCommand::ToggleVoice => {
                let state = self.engine.toggle_voice();
                self.say(format!("Voice: {}", state))?;
            }
            ChatCommand::ToggleVoiceInput => {
                let on = self.engine.toggle_voice_input();
                self.say(format!("Voice input {}", on_off(on)))?;
            }
            ChatCommand::ToggleVoiceOutput => {
                let on = self.engine.toggle_voice_output();
                self.say(format!("Voice output {}", on_off(on)))?;
            }
            ChatCommand::SetVoice(voice) => {
                self.say(format!("Voice set to {}", voice))?;
                self.engine.set_voice(Some(voice));
            }
            ChatCommand::Export => match self.engine.export_session() {
                Some(document) => {
                    self.say(format!("Exporting {} messages...", document.message_count))?
                }
                None => self.say("Nothing to export.")?,
            },
            ChatCommand::Attach(paths) => self.attach(paths)?,
            ChatCommand::Detach(id) => {
                if !self.engine.remove_pending_attachment(&id) {
                    self.say(format!("No pending attachment {}", id))?;
                }
            }
            ChatCommand::DetachAll => self.engine.clear_pending_attachments(),
            ChatCommand::Key(chord) => {
                match parse_chord(&chord, self.engine.keymap().platform()) {
                    Ok(chord) => {
                        if self.engine.handle_key(&chord).is_none() {
                            self.say(format!("{} is not bound", chord))?;
                        }
                    }
                    Err(e) => self.say(format!("! {}", e))?,
                }
            }
            ChatCommand::Copy(id) => {
                if self.engine.copy_message(&id) {
                    self.say("Copied.")?;
                } else {
                    self.say(format!("No message {}", id))?;
                }
            }
            ChatCommand::MarkRead => {
                let count = self.engine.mark_all_read();
                self.say(format!("Marked {} read.", count))?;
            }
            ChatCommand::Status => self.print_status()?,
            ChatCommand::Stats => match &self.metrics {
                Some(handle) => {
                    let rendered = handle.render();
                    let lines: Vec<String> = crate::metrics::summarize(&rendered)
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    if lines.is_empty() {
                        self.say("No counters yet.")?;
                    }
                    for line in lines {
                        self.say(line)?;
                    }
                }
                None => self.say("Metrics are not enabled.")?,
            },
            ChatCommand::History => {
                self.shown.clear();
                self.seen_revision = None;
            }
            ChatCommand::Help => self.say(HELP)?,
            ChatCommand::Quit { end_session } => return Ok(Flow::Quit { end_session }),
            ChatCommand::Invalid(reason) => self.say(format!("! {}", reason))?,
            ChatCommand::Unknown(name) => {
                self.say(format!("Unknown command !{}. Try !help.", name))?
            }
        }
        Ok(Flow::Continue)
    }

    fn attach(&mut self, paths: Vec<String>) -> Result<()> {
        let mut files = Vec::new();
        for path in paths {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => files.push(LocalFile::new(&path, meta.len())),
                Ok(_) => self.say(format!("! {} is not a file", path))?,
                Err(e) => self.say(format!("! {}: {}", path, e))?,
            }
        }
        if !files.is_empty() {
            let accepted = self.engine.attach_files(files);
            self.say(format!("Attaching {} file(s)...", accepted))?;
        }
        Ok(())
    }

    fn close_search(&mut self) -> Result<()> {
        self.engine.close_search();
        // Reprint anything that changed while results were showing
        self.seen_revision = None;
        self.say("Search closed.")
    }

    fn print_results(&mut self) -> Result<()> {
        let agent = self.agent_name();
        let lines: Vec<String> = self
            .engine
            .visible_messages()
            .into_iter()
            .map(|m| format_message(m, &agent))
            .collect();
        self.say(format!("-- {} match(es) --", lines.len()))?;
        for line in lines {
            self.say(line)?;
        }
        Ok(())
    }

    fn print_status(&mut self) -> Result<()> {
        let mut lines = Vec::new();
        match self.engine.session() {
            Some(session) => {
                lines.push(format!("Session {} with {}", session.id, session.agent.name));
            }
            None => lines.push("No session".to_string()),
        }
        lines.push(format!("Connection: {}", self.engine.connection_state()));
        if let Some(presence) = self.engine.presence() {
            lines.push(format!("Agent is {}", presence));
        }
        lines.push(format!(
            "Messages: {} ({} unread)",
            self.engine.store().len(),
            self.engine.unread_count()
        ));
        lines.push(format!("Voice: {}", self.engine.voice_state()));
        for attachment in self.engine.attachments().pending() {
            lines.push(format!("Pending: {} [{}]", attachment.filename, attachment.id));
        }
        if let Some(location) = self.engine.last_export() {
            lines.push(format!("Last export: {}", location));
        }
        for line in lines {
            self.say(line)?;
        }
        Ok(())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Drive the shell until the input ends or the user quits.
/// Returns whether the session should be ended (history deleted).
pub async fn run<W, R>(shell: &mut ChatShell<W>, input: R) -> Result<bool>
where
    W: Write,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    shell.refresh()?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read input")? {
                    Some(line) => {
                        if let Flow::Quit { end_session } = shell.handle_line(&line)? {
                            return Ok(end_session);
                        }
                    }
                    None => return Ok(false),
                }
            }
            event = shell.engine.next_event() => {
                if let Some(event) = event {
                    shell.engine.apply(event);
                }
            }
        }
        shell.refresh()?;
    }
}
