//! Size and width grammar for listing titles.
//!
//! Recognises a trailing `<size> [<width>]` in free text, e.g.
//! `"Trail Runner 9.5 Wide"` or `"Court Shoe Size 11"`. Sizes are one or two
//! digits with an optional single decimal; widths are configured words
//! (`"extra wide"`) or their codes (`"X"`).

use crate::error::Result;
use core_runtime::config::WidthWord;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeWidth {
    /// Size with single-digit whole part zero padded (`"9.5"` → `"09.5"`).
    pub size: String,
    /// Width code when the title states one.
    pub width: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SizeParser {
    pattern: Regex,
    /// Lowercased word or code to code.
    widths: HashMap<String, String>,
}

impl SizeParser {
    pub fn new(width_words: &[WidthWord]) -> Result<Self> {
        let mut widths = HashMap::new();
        let mut tokens: Vec<String> = Vec::new();

        for width in width_words {
            let word = collapse_whitespace(&width.word).to_lowercase();
            let code = width.code.trim().to_uppercase();
            widths.entry(word.clone()).or_insert_with(|| code.clone());
            widths.entry(code.to_lowercase()).or_insert_with(|| code.clone());
            tokens.push(word);
            tokens.push(code.to_lowercase());
        }

        // Longest first so "extra wide" wins over "wide".
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        tokens.dedup();

        let alternatives = tokens
            .iter()
            .map(|token| regex::escape(token).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");

        let width_group = if alternatives.is_empty() {
            String::new()
        } else {
            format!(r"(?:\s+({}))?", alternatives)
        };

        let pattern = Regex::new(&format!(
            r"(?i)(?:^|[^\w.])(?:size\s*)?(\d{{1,2}}(?:\.\d)?){}$",
            width_group
        ))?;

        Ok(Self { pattern, widths })
    }

    /// Parse the trailing size/width of a title.
    pub fn parse(&self, title: &str) -> Option<SizeWidth> {
        let title = title.trim_end_matches(|c: char| !c.is_alphanumeric());
        let captures = self.pattern.captures(title)?;

        let size = pad_size(captures.get(1)?.as_str());
        let width = captures.get(2).and_then(|token| {
            let key = collapse_whitespace(token.as_str()).to_lowercase();
            self.widths.get(&key).cloned()
        });

        Some(SizeWidth { size, width })
    }

    /// Candidate SKUs with their confidence, most specific first.
    ///
    /// An explicit width yields `{model}-{width}-{size}`; otherwise each
    /// guess is tried in order. `{model}-{size}` always comes last.
    pub fn candidates(
        &self,
        model: &str,
        parsed: &SizeWidth,
        width_guesses: &[String],
    ) -> Vec<(String, f64)> {
        let model = model.trim().to_uppercase();
        let mut candidates = Vec::new();

        match &parsed.width {
            Some(width) => {
                candidates.push((format!("{}-{}-{}", model, width, parsed.size), 0.9));
            }
            None => {
                for guess in width_guesses {
                    let guess = guess.trim().to_uppercase();
                    candidates.push((format!("{}-{}-{}", model, guess, parsed.size), 0.9));
                }
            }
        }

        candidates.push((format!("{}-{}", model, parsed.size), 0.88));
        candidates
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pad_size(size: &str) -> String {
    let whole_len = size.split('.').next().map_or(0, str::len);
    if whole_len == 1 {
        format!("0{}", size)
    } else {
        size.to_string()
    }
}
