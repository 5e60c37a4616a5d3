//! Wraps user-attached file content in structural tags before it reaches the
//! agent, so downstream sanitizers can tell untrusted file data apart from
//! what the user typed.

use serde::Serialize;

const ATTACHED_FILES_TAG: &str = "nano_attached_files";
const FILE_CONTENT_TAG: &str = "nano_file_content";
const DISPLAY_MARKER: &str = "\u{1f4ce}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub content: String,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A message ready to send: `content` goes to the agent, `display` to the chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedMessage {
    pub content: String,
    pub display: String,
}

/// Build the outgoing message. Returns `None` when there is nothing to send.
pub fn compose_message(text: &str, files: &[AttachedFile]) -> Option<ComposedMessage> {
    let text = text.trim();
    if text.is_empty() && files.is_empty() {
        return None;
    }
    if files.is_empty() {
        return Some(ComposedMessage {
            content: text.to_string(),
            display: text.to_string(),
        });
    }

    let mut tagged = String::new();
    tagged.push('<');
    tagged.push_str(ATTACHED_FILES_TAG);
    tagged.push('>');
    for (i, file) in files.iter().enumerate() {
        if i > 0 {
            tagged.push('\n');
        }
        tagged.push_str("\n\n<");
        tagged.push_str(FILE_CONTENT_TAG);
        tagged.push_str(" type=\"file\" name=\"");
        append_xml_escaped(&mut tagged, &file.name);
        tagged.push_str("\">\n");
        append_xml_escaped(&mut tagged, &file.content);
        tagged.push_str("\n</");
        tagged.push_str(FILE_CONTENT_TAG);
        tagged.push('>');
    }
    tagged.push_str("</");
    tagged.push_str(ATTACHED_FILES_TAG);
    tagged.push('>');

    let file_list = files
        .iter()
        .map(|file| format!("{DISPLAY_MARKER} {}", file.name))
        .collect::<Vec<_>>()
        .join("\n");

    Some(ComposedMessage {
        content: join_paragraphs(text, &tagged),
        display: join_paragraphs(text, &file_list),
    })
}

fn join_paragraphs(head: &str, tail: &str) -> String {
    if head.is_empty() {
        tail.to_string()
    } else {
        format!("{head}\n\n{tail}")
    }
}

fn append_xml_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
}
