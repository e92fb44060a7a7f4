//! Comment decoration ("mail") options.
//!
//! The decoration is a space separated token list sent in the `mail`
//! attribute of a chat. Tokens are always rendered in the order anonymity,
//! color, size, position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

/// Token that hides the poster's user id.
pub const ANONYMOUS_TOKEN: &str = "184";

/// Named comment colors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommentColor {
    White,
    Red,
    Pink,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
}

/// Comment font size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommentSize {
    Medium,
    Big,
    Small,
}

/// Vertical placement of a comment on screen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommentPosition {
    /// Scrolls across the middle of the screen.
    Naka,
    /// Fixed at the top.
    Ue,
    /// Fixed at the bottom.
    Shita,
}

/// Decoration options for an outgoing comment.
///
/// ```
/// use nicolive::{CommentColor, Mail};
///
/// let mail = Mail::new().anonymous(true).color(CommentColor::Red);
/// assert_eq!(mail.to_string(), "184 red");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<CommentColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<CommentSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CommentPosition>,
}

type TokenRenderer = fn(&Mail) -> Option<&'static str>;

fn anonymity_token(mail: &Mail) -> Option<&'static str> {
    mail.anonymous.then_some(ANONYMOUS_TOKEN)
}

fn color_token(mail: &Mail) -> Option<&'static str> {
    mail.color.map(Into::into)
}

fn size_token(mail: &Mail) -> Option<&'static str> {
    mail.size.map(Into::into)
}

fn position_token(mail: &Mail) -> Option<&'static str> {
    mail.position.map(Into::into)
}

/// Rendering order of the decoration tokens.
const RENDERERS: [TokenRenderer; 4] = [anonymity_token, color_token, size_token, position_token];

impl Mail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn color(mut self, color: CommentColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn size(mut self, size: CommentSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn position(mut self, position: CommentPosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the color by name. Unknown names clear the color.
    pub fn color_name(mut self, name: &str) -> Self {
        self.color = CommentColor::from_str(name).ok();
        self
    }

    /// Set the size by name. Unknown names clear the size.
    pub fn size_name(mut self, name: &str) -> Self {
        self.size = CommentSize::from_str(name).ok();
        self
    }

    /// Set the position by name. Unknown names clear the position.
    pub fn position_name(mut self, name: &str) -> Self {
        self.position = CommentPosition::from_str(name).ok();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().next().is_none()
    }

    fn tokens(&self) -> impl Iterator<Item = &'static str> + '_ {
        RENDERERS.iter().filter_map(move |render| render(self))
    }

    /// Parse a received `mail` attribute.
    ///
    /// Unknown tokens (e.g. `iPhone`, `@5`) are ignored; when a category
    /// appears more than once the last token wins.
    pub fn parse_lenient(mail: &str) -> Self {
        mail.split_ascii_whitespace()
            .fold(Self::default(), |mut acc, token| {
                if token == ANONYMOUS_TOKEN {
                    acc.anonymous = true;
                } else if let Ok(color) = CommentColor::from_str(token) {
                    acc.color = Some(color);
                } else if let Ok(size) = CommentSize::from_str(token) {
                    acc.size = Some(size);
                } else if let Ok(position) = CommentPosition::from_str(token) {
                    acc.position = Some(position);
                }
                acc
            })
    }
}

impl fmt::Display for Mail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Mail::new(), "")]
    #[case(Mail::new().anonymous(true), "184")]
    #[case(Mail::new().color(CommentColor::Red), "red")]
    #[case(Mail::new().anonymous(true).color(CommentColor::Pink), "184 pink")]
    #[case(Mail::new().anonymous(true).color_name("red"), "184 red")]
    #[case(
        Mail::new().color_name("purple").size_name("big").position_name("shita"),
        "purple big shita"
    )]
    #[case(Mail::new().color_name("not-a-color"), "")]
    #[case(Mail::new().size_name("huge").position_name("ue"), "ue")]
    fn test_render(#[case] mail: Mail, #[case] expected: &str) {
        assert_eq!(mail.to_string(), expected);
    }

    #[test]
    fn test_order_is_fixed() {
        let mail = Mail::new()
            .position(CommentPosition::Naka)
            .size(CommentSize::Small)
            .color(CommentColor::Cyan)
            .anonymous(true);
        assert_eq!(mail.to_string(), "184 cyan small naka");
    }

    #[test]
    fn test_is_empty() {
        assert!(Mail::new().is_empty());
        assert!(Mail::new().color_name("gold").is_empty());
        assert!(!Mail::new().anonymous(true).is_empty());
    }

    #[test]
    fn test_parse_lenient() {
        let mail = Mail::parse_lenient("shita 184 iPhone big blue");
        assert_eq!(
            mail,
            Mail::new()
                .anonymous(true)
                .color(CommentColor::Blue)
                .size(CommentSize::Big)
                .position(CommentPosition::Shita)
        );
        assert_eq!(Mail::parse_lenient(""), Mail::new());
    }
}
