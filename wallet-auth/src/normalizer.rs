// SPDX-License-Identifier: Apache-2.0

//! Replace messages a hardware display cannot render with a plain ASCII fallback

use log::warn;

use crate::config::DEFAULT_FALLBACK_MESSAGE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimplificationReason {
    NonAsciiContent,
}

impl SimplificationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimplificationReason::NonAsciiContent => "non-ASCII content",
        }
    }
}

/// The message a device is asked to sign.
///
/// Anything that checks the resulting signature must use `effective`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub original: String,
    pub effective: String,
    pub reason: Option<SimplificationReason>,
}

impl NormalizedMessage {
    pub fn was_simplified(&self) -> bool {
        self.reason.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct MessageNormalizer {
    fallback: String,
}

impl Default for MessageNormalizer {
    fn default() -> Self {
        MessageNormalizer {
            fallback: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl MessageNormalizer {
    /// The fallback is kept to plain ASCII: other characters are dropped, and a
    /// fallback left blank by that is replaced with the default one.
    pub fn new(fallback: impl Into<String>) -> Self {
        let mut fallback = fallback.into();
        if !fallback.is_ascii() {
            warn!("fallback message is not plain ASCII, dropping the other characters");
            fallback.retain(|c| c.is_ascii());
        }
        if fallback.trim().is_empty() {
            warn!("fallback message is blank, using the default one");
            fallback = DEFAULT_FALLBACK_MESSAGE.to_string();
        }
        MessageNormalizer { fallback }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn resolve(&self, message: &str) -> NormalizedMessage {
        if contains_flagged_symbol(message) {
            NormalizedMessage {
                original: message.to_string(),
                effective: self.fallback.clone(),
                reason: Some(SimplificationReason::NonAsciiContent),
            }
        } else {
            NormalizedMessage {
                original: message.to_string(),
                effective: message.to_string(),
                reason: None,
            }
        }
    }
}

/// `resolve` with the default fallback
pub fn resolve(message: &str) -> NormalizedMessage {
    MessageNormalizer::default().resolve(message)
}

pub fn contains_flagged_symbol(message: &str) -> bool {
    message.chars().any(is_flagged)
}

/// Emoji, pictographs, dingbats and the joiners/selectors used to build them.
/// Accented letters and other scripts are not flagged.
fn is_flagged(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF     // mahjong .. symbols and pictographs extended-A
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2300..=0x23FF // misc technical (watch, hourglass)
            | 0x2B00..=0x2BFF // arrows and stars
            | 0x2190..=0x21FF
            | 0x3030 | 0x303D | 0x3297 | 0x3299
            | 0x200D          // zero width joiner
            | 0x20E3          // keycap
            | 0xFE0F          // variation selector-16
            | 0xE0020..=0xE007F
    )
}
