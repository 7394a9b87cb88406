use super::errors::ParseError;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

// 内置支持的来源：YouTube 与 Instagram
pub const DEFAULT_SOURCE_PATTERNS: &[&str] = &[
    r"^https?://(www\.|m\.|music\.)?youtube\.com/(watch\?|shorts/|live/|embed/)",
    r"^https?://youtu\.be/[\w-]+",
    r"^https?://(www\.)?instagram\.com/(p|reel|reels|tv)/[\w-]+",
];

lazy_static! {
    static ref DEFAULT_PATTERNS: Vec<Regex> = DEFAULT_SOURCE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("内置URL规则必须合法"))
        .collect();
}

/// URL 白名单。未通过校验的链接永远不会交给下载器。
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    patterns: Vec<Regex>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.clone(),
        }
    }
}

impl UrlPolicy {
    pub fn new<I, S>(patterns: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// 在内置规则之后追加额外规则
    pub fn with_extra<I, S>(mut self, extra: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in extra {
            self.patterns.push(Regex::new(pattern.as_ref())?);
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn validate(&self, input: &str) -> Result<Url, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::EmptyUrl);
        }

        let url = Url::parse(input).map_err(|_| ParseError::InvalidUrl(input.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ParseError::InvalidUrl(input.to_string()));
        }

        let allowed = self
            .patterns
            .iter()
            .any(|p| p.is_match(input) || p.is_match(url.as_str()));
        if allowed {
            Ok(url)
        } else {
            Err(ParseError::UnsupportedSource(input.to_string()))
        }
    }
}
