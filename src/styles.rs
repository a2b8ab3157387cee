//! Chat styles
//!
//! Named personas whose directive is placed in front of the user prompt.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Returned when a style name is not known
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown chat style: {0}")]
pub struct UnknownStyle(pub String);

/// Persona applied to a chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChatStyle {
    /// No directive
    #[default]
    Normal,
    /// Grumpy but helpful
    Tsundere,
    /// Obsessively devoted
    Yandere,
    /// Cat girl
    Nyandere,
    /// Shy and quiet
    Dandere,
    /// Clumsy and cheerful
    Bakadere,
    /// Dramatic, imaginary powers
    Chuunibyou,
    /// Elegant young lady
    Ojou,
    /// Experienced mentor
    Senpai,
    /// Energetic and optimistic
    Genki,
}

impl ChatStyle {
    /// Every style, in menu order
    pub const ALL: [Self; 10] = [
        Self::Normal,
        Self::Tsundere,
        Self::Yandere,
        Self::Nyandere,
        Self::Dandere,
        Self::Bakadere,
        Self::Chuunibyou,
        Self::Ojou,
        Self::Senpai,
        Self::Genki,
    ];

    /// Lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Tsundere => "tsundere",
            Self::Yandere => "yandere",
            Self::Nyandere => "nyandere",
            Self::Dandere => "dandere",
            Self::Bakadere => "bakadere",
            Self::Chuunibyou => "chuunibyou",
            Self::Ojou => "ojou",
            Self::Senpai => "senpai",
            Self::Genki => "genki",
        }
    }

    /// Emoji shown in style menus
    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Normal => "💭",
            Self::Tsundere => "😤",
            Self::Yandere => "🔪",
            Self::Nyandere => "🐾",
            Self::Dandere => "🤫",
            Self::Bakadere => "🤪",
            Self::Chuunibyou => "🌟",
            Self::Ojou => "👑",
            Self::Senpai => "📚",
            Self::Genki => "✨",
        }
    }

    /// Directive prepended to the prompt, `None` for `Normal`
    #[must_use]
    pub const fn directive(self) -> Option<&'static str> {
        let text = match self {
            Self::Normal => return None,
            Self::Tsundere => "Answer like a tsundere: act annoyed and drop a random \"hmph\" or \"baka\". Help reluctantly, but keep the information accurate.",
            Self::Yandere => "Answer like a yandere: show obsessive devotion and now and then mention \"protecting\" the user. Keep the tone sweet but intensely possessive.",
            Self::Nyandere => "Answer like a cat girl: add \"nya~\" to sentences and be playful and energetic. Use cat metaphors where you can.",
            Self::Dandere => "Answer like a dandere: shy and quiet at first, but show deep knowledge. Use short sentences and stutter occasionally.",
            Self::Bakadere => "Answer like a bakadere: enthusiastic but clumsy. Make small mistakes and correct yourself. Always stay cheerful and helpful.",
            Self::Chuunibyou => "Answer like a chuunibyou: refer to imaginary powers and secret knowledge. Be dramatic, but make sure the information is accurate.",
            Self::Ojou => "Answer like an ojou-sama: elegant and refined. Use formal language and add an occasional \"ohoho~\". Stay noble while helping.",
            Self::Senpai => "Answer like a senpai: experienced and helpful. Guide the user patiently while keeping a slight air of superiority.",
            Self::Genki => "Answer like a genki character: extremely energetic and optimistic. Use plenty of exclamation marks and show excitement.",
        };
        Some(text)
    }
}

impl fmt::Display for ChatStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChatStyle {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.name() == name)
            .ok_or(UnknownStyle(name))
    }
}
