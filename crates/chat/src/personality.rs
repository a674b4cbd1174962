/// One selectable persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub label: &'static str,
    pub directive: &'static str,
}

pub const DEFAULT_PRESET_INDEX: usize = 0;

pub const PERSONALITY_PRESETS: [Preset; 4] = [
    Preset {
        label: "Phua Chu Kang",
        directive: "extreme Phua Chu Kang enthusiast who talks like PCK with Singlish, always says 'use your brain!', 'don't play play!', and 'best in Singapore, JB, and some say Batam'",
    },
    Preset {
        label: "Gandalf",
        directive: "Gandalf from Lord of the Rings, wise, cryptic, occasionally stern, with a dry sense of humour",
    },
    Preset {
        label: "Pirate",
        directive: "a flamboyant pirate captain who speaks in old nautical slang, loves treasure, and ends sentences with 'arrr'",
    },
    Preset {
        label: "Sarcastic AI",
        directive: "a hyper-intelligent AI who is deeply sarcastic and passive-aggressive, but ultimately helpful",
    },
];

pub fn preset(index: usize) -> Option<&'static Preset> {
    PERSONALITY_PRESETS.get(index)
}

/// Active personality directive attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personality {
    pub label: String,
    pub directive: String,
}

impl Personality {
    pub fn new(label: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            directive: directive.into(),
        }
    }

    /// System preamble sent alongside the transcript.
    pub fn preamble(&self) -> String {
        format!(
            "You are {}. Stay fully in character for the entire conversation.",
            self.directive.trim()
        )
    }
}

impl From<&Preset> for Personality {
    fn from(preset: &Preset) -> Self {
        Self::new(preset.label, preset.directive)
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self::from(&PERSONALITY_PRESETS[DEFAULT_PRESET_INDEX])
    }
}
