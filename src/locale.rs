//! User-facing message language selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Fr,
}

impl Locale {
    /// Picks the first supported language from an `Accept-Language` value.
    pub fn from_accept_language(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Locale::En;
        };
        for part in header.split(',') {
            let tag = part.split(';').next().unwrap_or("").trim().to_lowercase();
            if tag.starts_with("fr") {
                return Locale::Fr;
            }
            if tag.starts_with("en") {
                return Locale::En;
            }
        }
        Locale::En
    }

    pub fn pick<'a>(&self, en: &'a str, fr: &'a str) -> &'a str {
        match self {
            Locale::En => en,
            Locale::Fr => fr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_language_selects_first_supported_tag() {
        assert_eq!(Locale::from_accept_language(Some("fr-CM,fr;q=0.9,en;q=0.8")), Locale::Fr);
        assert_eq!(Locale::from_accept_language(Some("de-DE,en;q=0.5")), Locale::En);
        assert_eq!(Locale::from_accept_language(Some("de-DE")), Locale::En);
        assert_eq!(Locale::from_accept_language(None), Locale::En);
    }
}
