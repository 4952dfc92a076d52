//! Widget data model: registrations, content updates and sender identity

pub mod migration;
pub mod registry;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::style::WidgetStyle;

pub use registry::{FileRegistry, MemoryRegistry, RegistrationStore};

/// One home-screen widget instance placed by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetRegistration {
    /// Platform-assigned id, stable for the widget's lifetime
    pub id: i32,

    /// Senders this widget accepts; empty accepts everyone
    #[serde(default)]
    pub friend_filter: BTreeSet<String>,

    #[serde(default)]
    pub style: WidgetStyle,

    #[serde(default)]
    pub is_sender_info_shown: bool,
}

impl WidgetRegistration {
    /// Create a registration with default style that accepts every sender
    pub fn new(id: i32) -> Self {
        Self {
            id,
            friend_filter: BTreeSet::new(),
            style: WidgetStyle::default(),
            is_sender_info_shown: false,
        }
    }

    pub fn with_style(mut self, style: WidgetStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_filter<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.friend_filter = senders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sender_info(mut self, shown: bool) -> Self {
        self.is_sender_info_shown = shown;
        self
    }

    /// Whether content from `sender_id` should land on this widget
    pub fn accepts(&self, sender_id: &str) -> bool {
        self.friend_filter.is_empty() || self.friend_filter.contains(sender_id)
    }

    /// Rectangle widgets with the sender overlay switched on
    pub fn shows_sender_overlay(&self) -> bool {
        self.style.is_rectangle() && self.is_sender_info_shown
    }
}

/// How the content of an update should be presented
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentMode {
    /// A plain photo
    #[default]
    None,
    /// A video, shown through its thumbnail with a play button
    Video { id: String, thumb_link: String },
    /// Dual capture flipping between two frames
    Live {
        #[serde(default)]
        secondary_link: Option<String>,
    },
    /// Emoji mashup that only makes sense next to the sender's identity
    Mood,
}

/// The unit of work pushed to a widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub sender_id: String,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    pub photo_id: String,
    #[serde(default)]
    pub mode: ContentMode,
    pub photo_link: String,
    /// Reaction emoji attached to the update, if any
    #[serde(default)]
    pub reaction: Option<String>,
}

impl ContentUpdate {
    pub fn new(
        sender_id: impl Into<String>,
        photo_id: impl Into<String>,
        photo_link: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            date: Utc::now(),
            photo_id: photo_id.into(),
            mode: ContentMode::None,
            photo_link: photo_link.into(),
            reaction: None,
        }
    }

    pub fn with_mode(mut self, mode: ContentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_reaction(mut self, reaction: impl Into<String>) -> Self {
        self.reaction = Some(reaction.into());
        self
    }

    pub fn is_mood(&self) -> bool {
        matches!(self.mode, ContentMode::Mood)
    }

    pub fn is_video(&self) -> bool {
        matches!(self.mode, ContentMode::Video { .. })
    }

    /// Link of the image to draw in the content region
    pub fn source_link(&self) -> &str {
        match &self.mode {
            ContentMode::Video { thumb_link, .. } => thumb_link,
            _ => &self.photo_link,
        }
    }
}

/// Identity shown next to the content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub photo_link: String,
    pub name: String,
}

impl SenderInfo {
    pub fn new(photo_link: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            photo_link: photo_link.into(),
            name: name.into(),
        }
    }
}
