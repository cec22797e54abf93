use regex::{Regex, RegexBuilder};

use crate::{domain::ChatId, errors::Error, Result};

pub const DEFAULT_INCLUDE_PATTERN: &str = r"open\.kakao\.com";

/// Keyword rules, built once at startup.
#[derive(Clone, Debug)]
pub struct FilterConfig {
    include: Regex,
    exclude: Vec<(String, Regex)>,
}

impl FilterConfig {
    /// `include_pattern` is a regex; `exclude_keywords` are matched literally.
    /// Both are case-insensitive. Blank exclude entries are ignored.
    pub fn new(include_pattern: &str, exclude_keywords: &[String]) -> Result<Self> {
        let include = RegexBuilder::new(include_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid KEYWORD_PATTERN: {e}")))?;

        let mut exclude = Vec::new();
        for kw in exclude_keywords {
            let kw = kw.trim();
            if kw.is_empty() {
                continue;
            }
            let re = RegexBuilder::new(&regex::escape(kw))
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Config(format!("invalid exclude keyword {kw:?}: {e}")))?;
            exclude.push((kw.to_string(), re));
        }

        Ok(Self { include, exclude })
    }

    pub fn include_pattern(&self) -> &str {
        self.include.as_str()
    }

    pub fn exclude_keywords(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(|(kw, _)| kw.as_str())
    }
}

/// Why a message is not a forwarding candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    FromDestination,
    NoKeyword,
    Excluded(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Candidate,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_candidate(&self) -> bool {
        matches!(self, Verdict::Candidate)
    }
}

/// Cheap-first candidacy check: emptiness, origin, include, exclude.
///
/// The dedup lookup is deliberately not part of this chain; the pipeline runs
/// it only for messages that pass here.
#[derive(Clone, Debug)]
pub struct FilterChain {
    cfg: FilterConfig,
    destination: Option<ChatId>,
}

impl FilterChain {
    pub fn new(cfg: FilterConfig) -> Self {
        Self {
            cfg,
            destination: None,
        }
    }

    /// Set once the destination has been resolved for the current session.
    pub fn set_destination(&mut self, destination: Option<ChatId>) {
        self.destination = destination;
    }

    pub fn should_consider(&self, chat_id: ChatId, text: Option<&str>) -> Verdict {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Verdict::Rejected(Rejection::Empty);
        };

        if self.destination == Some(chat_id) {
            return Verdict::Rejected(Rejection::FromDestination);
        }

        if !self.cfg.include.is_match(text) {
            return Verdict::Rejected(Rejection::NoKeyword);
        }

        if let Some((kw, _)) = self.cfg.exclude.iter().find(|(_, re)| re.is_match(text)) {
            return Verdict::Rejected(Rejection::Excluded(kw.clone()));
        }

        Verdict::Candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(excludes: &[&str]) -> FilterChain {
        let excludes: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
        FilterChain::new(FilterConfig::new(DEFAULT_INCLUDE_PATTERN, &excludes).unwrap())
    }

    #[test]
    fn keyword_messages_are_candidates() {
        let c = chain(&["spam"]);
        assert!(c
            .should_consider(ChatId(1), Some("check out open.kakao.com/xyz"))
            .is_candidate());
        assert!(c
            .should_consider(ChatId(1), Some("OPEN.KAKAO.COM/o/Abc"))
            .is_candidate());
        assert_eq!(
            c.should_consider(ChatId(1), Some("check out other-site.com")),
            Verdict::Rejected(Rejection::NoKeyword)
        );
    }

    #[test]
    fn excluded_keyword_vetoes_a_match() {
        let c = chain(&["spam", "  ", "광고"]);
        assert_eq!(
            c.should_consider(ChatId(1), Some("open.kakao.com but also contains SPAM")),
            Verdict::Rejected(Rejection::Excluded("spam".to_string()))
        );
        assert_eq!(
            c.should_consider(ChatId(1), Some("광고 open.kakao.com/o/1")),
            Verdict::Rejected(Rejection::Excluded("광고".to_string()))
        );
        assert_eq!(c.cfg.exclude_keywords().count(), 2);
    }

    #[test]
    fn exclude_keywords_are_literal() {
        let c = chain(&["a.b"]);
        assert!(c
            .should_consider(ChatId(1), Some("open.kakao.com axb"))
            .is_candidate());
        assert!(!c
            .should_consider(ChatId(1), Some("open.kakao.com a.b"))
            .is_candidate());
    }

    #[test]
    fn empty_text_is_rejected_first() {
        let mut c = chain(&[]);
        c.set_destination(Some(ChatId(9)));
        assert_eq!(
            c.should_consider(ChatId(9), None),
            Verdict::Rejected(Rejection::Empty)
        );
        assert_eq!(
            c.should_consider(ChatId(1), Some(" \n\t")),
            Verdict::Rejected(Rejection::Empty)
        );
    }

    #[test]
    fn messages_from_destination_are_rejected() {
        let mut c = chain(&[]);
        c.set_destination(Some(ChatId(-1009)));
        assert_eq!(
            c.should_consider(ChatId(-1009), Some("open.kakao.com/o/loop")),
            Verdict::Rejected(Rejection::FromDestination)
        );
        assert!(c
            .should_consider(ChatId(-1008), Some("open.kakao.com/o/loop"))
            .is_candidate());
    }

    #[test]
    fn invalid_include_pattern_is_a_config_error() {
        let err = FilterConfig::new("(unclosed", &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
