// ABOUTME: Plain-text rendering of chat messages, notices and status for the terminal
// ABOUTME: Markdown bodies are flattened through pulldown-cmark; code keeps its fences

use chrono::Local;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use tutorchat_core::{ChatMessage, ContentKind, Delivery, Notice, Sender};

/// Flatten markdown into readable terminal text
pub fn markdown_to_terminal(markdown: &str) -> String {
    let mut out = String::new();
    let mut list_depth: usize = 0;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                ensure_blank_line(&mut out);
                let hashes = match level {
                    HeadingLevel::H1 => "# ",
                    HeadingLevel::H2 => "## ",
                    _ => "### ",
                };
                out.push_str(hashes);
            }
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Paragraph) => out.push('\n'),
            Event::Start(Tag::Paragraph) => {
                if list_depth == 0 {
                    ensure_blank_line(&mut out);
                }
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => list_depth = list_depth.saturating_sub(1),
            Event::Start(Tag::Item) => {
                ensure_newline(&mut out);
                out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                out.push_str("- ");
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                ensure_blank_line(&mut out);
                out.push_str("```");
                if let CodeBlockKind::Fenced(lang) = kind {
                    out.push_str(&lang);
                }
                out.push('\n');
            }
            Event::End(TagEnd::CodeBlock) => {
                ensure_newline(&mut out);
                out.push_str("```\n");
            }
            Event::Start(Tag::Emphasis) | Event::End(TagEnd::Emphasis) => out.push('_'),
            Event::Start(Tag::Strong) | Event::End(TagEnd::Strong) => out.push_str("**"),
            Event::Code(code) => {
                out.push('`');
                out.push_str(&code);
                out.push('`');
            }
            Event::Text(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => {
                ensure_newline(&mut out);
                out.push_str("----\n");
            }
            _ => {}
        }
    }

    out.trim().to_string()
}

fn ensure_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    if out.is_empty() {
        return;
    }
    ensure_newline(out);
    if !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn body(message: &ChatMessage) -> String {
    match message.kind {
        ContentKind::Markdown => markdown_to_terminal(&message.content),
        ContentKind::Code => format!(
            "```{}\n{}\n```",
            message.code_language().unwrap_or(""),
            message.content.trim_end()
        ),
        _ => message.content.clone(),
    }
}

/// One message as it appears in the log
pub fn format_message(message: &ChatMessage, agent_name: &str) -> String {
    let who = match message.sender {
        Sender::LocalUser => "you",
        Sender::RemoteAgent => agent_name,
    };
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let marker = match (message.sender, message.delivery) {
        (Sender::LocalUser, Delivery::Pending) => " …",
        (Sender::LocalUser, Delivery::Failed) => " (not delivered)",
        _ => "",
    };

    let mut out = format!("[{}] {}{}: {}", time, who, marker, body(message));
    for attachment in &message.attachments {
        out.push_str(&format!(
            "\n    + {} ({}, {} bytes)",
            attachment.filename, attachment.mime_type, attachment.size
        ));
    }
    if !message.reactions.is_empty() {
        let reactions: Vec<String> = message
            .reactions
            .iter()
            .map(|r| format!("{} {}", r.emoji, r.count))
            .collect();
        out.push_str(&format!("\n    {}", reactions.join("  ")));
    }
    out
}

pub fn format_notice(notice: &Notice) -> String {
    format!("! {}", notice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_flattening() {
        let text = markdown_to_terminal("# Loops\n\nUse **for**:\n\n- one\n- two\n\n```python\nfor x in y:\n    pass\n```");
        assert!(text.starts_with("# Loops"));
        assert!(text.contains("Use **for**:"));
        assert!(text.contains("- one\n- two"));
        assert!(text.contains("```python\nfor x in y:\n    pass\n```"));
    }

    #[test]
    fn test_code_message_is_fenced() {
        let msg = ChatMessage::remote("print(1)", ContentKind::Code);
        let line = format_message(&msg, "Tutor");
        assert!(line.contains("Tutor: ```"));
        assert!(line.ends_with("print(1)\n```"));
    }

    #[test]
    fn test_failed_local_message_is_marked() {
        let mut msg = ChatMessage::local("hi", ContentKind::Text);
        msg.delivery = Delivery::Failed;
        assert!(format_message(&msg, "Tutor").contains("you (not delivered): hi"));
    }
}
