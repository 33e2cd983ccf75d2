//! Plain-text rendering of timeline content for the terminal.

use opsloom_client::{Assistant, ContentBlock, HistoryEntry, Message, MessageContent, Role};

/// Render one content block as plain text.
pub fn render_block(block: &ContentBlock) -> String {
    if let Some(text) = block.as_text() {
        return text.to_string();
    }
    match block {
        ContentBlock::Typed(typed) => match typed.fields.get("title").and_then(|t| t.as_str()) {
            Some(title) => format!("[{}: {title}]", typed.kind),
            None => format!("[{}]", typed.kind),
        },
        ContentBlock::Other(value) => value.to_string(),
        ContentBlock::Plain(text) => text.clone(),
    }
}

/// Render message content as plain text, one block per line.
pub fn render_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(render_block)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a whole message with a role prefix.
pub fn render_message(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut line = format!("{who}> {}", render_content(&message.blocks));
    if let Some(id) = &message.id {
        if message.role == Role::Assistant {
            line.push_str(&format!("\n  (message {id})"));
        }
    }
    if let Some(sources) = message.sources.as_ref().filter(|s| !s.is_empty()) {
        for source in sources {
            line.push_str(&format!("\n  source: {} <{}>", source.source, source.link));
        }
    }
    line
}

/// One history line: id, creation time and title.
pub fn render_history_entry(entry: &HistoryEntry) -> String {
    format!(
        "{}  {}  {}",
        entry.id,
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.title.as_deref().unwrap_or("(untitled)")
    )
}

/// One catalogue line: id, title and description.
pub fn render_assistant(assistant: &Assistant) -> String {
    let description = assistant
        .metadata
        .as_ref()
        .map(|m| m.description.as_str())
        .unwrap_or_default();
    if description.is_empty() {
        format!("{}  {}", assistant.id, assistant.display_name())
    } else {
        format!("{}  {}  {description}", assistant.id, assistant.display_name())
    }
}

/// Tracks how much of the streaming reply has been printed.
///
/// Records are snapshots, so each update prints only the new suffix when the
/// reply grew, and reprints the reply when earlier text changed.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    from: usize,
    index: Option<usize>,
    printed: String,
}

impl ReplyPrinter {
    /// Follow assistant messages at or after `from`.
    pub fn new(from: usize) -> Self {
        Self {
            from,
            ..Self::default()
        }
    }

    /// Text to print to bring the terminal up to date, if any.
    pub fn advance(&mut self, messages: &[Message]) -> Option<String> {
        let (index, message) = messages
            .iter()
            .enumerate()
            .skip(self.from)
            .rev()
            .find(|(_, m)| m.role == Role::Assistant)?;
        let text = render_content(&message.blocks);

        let mut out = String::new();
        if self.index != Some(index) {
            if self.index.is_some() {
                out.push('\n');
            }
            self.index = Some(index);
            self.printed.clear();
        }

        match text.strip_prefix(self.printed.as_str()) {
            Some(rest) => out.push_str(rest),
            None => {
                out.push('\n');
                out.push_str(&text);
            }
        }
        self.printed = text;

        (!out.is_empty()).then_some(out)
    }
}
