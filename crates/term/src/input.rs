/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Message(String),
    ListPresets,
    SelectPreset(usize),
    NewConversation,
    Stop,
    Help,
    Quit,
    Unknown(String),
    Blank,
}

impl InputLine {
    /// Parses a raw line. Presets are numbered from 1 at the prompt.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Message(trimmed.to_string());
        };

        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("presets"), None) => Self::ListPresets,
            (Some("preset"), Some(number)) => match number.parse::<usize>() {
                Ok(number) if number >= 1 => Self::SelectPreset(number - 1),
                _ => Self::Unknown(trimmed.to_string()),
            },
            (Some("new"), None) => Self::NewConversation,
            (Some("stop"), None) => Self::Stop,
            (Some("help"), None) => Self::Help,
            (Some("quit" | "exit"), None) => Self::Quit,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

pub const HELP_TEXT: &str = "\
Type a message and press Enter to chat.
  /presets      list personalities
  /preset <n>   switch personality (starts a new conversation)
  /new          start a new conversation
  /stop         stop the current reply
  /quit         exit";
