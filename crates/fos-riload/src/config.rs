//! Engine Configuration

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::breakpoint::BreakpointTable;
use crate::error::RiloadError;
use crate::viewport::DEFAULT_THRESHOLD;

/// When images are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeferMode {
    /// Load every image as soon as the document is ready
    #[default]
    Immediate,
    /// Wait for the window load event, then load everything
    Load,
    /// Load images as they approach the viewport
    BelowFold,
}

impl DeferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferMode::Immediate => "false",
            DeferMode::Load => "load",
            DeferMode::BelowFold => "belowfold",
        }
    }

    /// Lenient parse: unrecognized names mean immediate loading.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown defer mode '{}', loading immediately", name);
            DeferMode::Immediate
        })
    }
}

impl FromStr for DeferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "belowfold" => Ok(DeferMode::BelowFold),
            "load" => Ok(DeferMode::Load),
            "false" | "" => Ok(DeferMode::Immediate),
            other => Err(format!("unknown defer mode '{}'", other)),
        }
    }
}

impl fmt::Display for DeferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeferMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DeferMode::Immediate => serializer.serialize_bool(false),
            other => serializer.serialize_str(other.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for DeferMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => DeferMode::Immediate,
            Raw::Flag(true) => {
                tracing::warn!("Defer mode 'true' is not a mode, loading immediately");
                DeferMode::Immediate
            }
            Raw::Name(name) => DeferMode::from_name(&name),
        })
    }
}

/// Serializable engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiloadConfig {
    /// Prefix for every image URL
    pub base_url: String,

    pub defer: DeferMode,

    /// Extra attempts after a failed fetch, per image
    pub retries: u32,

    /// Start loading this many pixels before an image scrolls into view
    pub threshold: i32,

    /// Size key breakpoints. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<BreakpointTable>,
}

impl Default for RiloadConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            defer: DeferMode::Immediate,
            retries: 0,
            threshold: DEFAULT_THRESHOLD,
            media: None,
        }
    }
}

impl RiloadConfig {
    pub fn new(media: BreakpointTable) -> Self {
        Self { media: Some(media), ..Self::default() }
    }

    pub fn from_json_str(json: &str) -> Result<Self, RiloadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RiloadError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn defer(mut self, defer: DeferMode) -> Self {
        self.defer = defer;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    /// The breakpoint table, rejecting a missing or empty one
    pub fn media(&self) -> Result<&BreakpointTable, RiloadError> {
        match &self.media {
            None => Err(RiloadError::MissingMedia),
            Some(table) if table.is_empty() => Err(RiloadError::EmptyMedia),
            Some(table) => Ok(table),
        }
    }
}

/// Per-image user callback
pub type ImageCallback<I> = Rc<dyn Fn(&I)>;

/// Full engine options: settings plus the parts that cannot be serialized
pub struct Options<I, N> {
    pub config: RiloadConfig,
    /// Collection root; the document body when `None`
    pub parent_node: Option<N>,
    pub on_load: Option<ImageCallback<I>>,
    pub on_error: Option<ImageCallback<I>>,
}

impl<I, N> Options<I, N> {
    pub fn new(config: RiloadConfig) -> Self {
        Self {
            config,
            parent_node: None,
            on_load: None,
            on_error: None,
        }
    }

    pub fn parent_node(mut self, node: N) -> Self {
        self.parent_node = Some(node);
        self
    }

    pub fn on_load(mut self, callback: impl Fn(&I) + 'static) -> Self {
        self.on_load = Some(Rc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&I) + 'static) -> Self {
        self.on_error = Some(Rc::new(callback));
        self
    }
}

impl<I, N> From<RiloadConfig> for Options<I, N> {
    fn from(config: RiloadConfig) -> Self {
        Self::new(config)
    }
}

impl<I, N: fmt::Debug> fmt::Debug for Options<I, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .field("parent_node", &self.parent_node)
            .field("on_load", &self.on_load.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakpointRange;

    #[test]
    fn test_defaults() {
        let config = RiloadConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.defer, DeferMode::Immediate);
        assert_eq!(config.retries, 0);
        assert_eq!(config.threshold, 100);
        assert!(config.media.is_none());
    }

    #[test]
    fn test_media_is_required() {
        let config = RiloadConfig::default();
        assert!(matches!(config.media(), Err(RiloadError::MissingMedia)));

        let config = RiloadConfig::new(BreakpointTable::new());
        assert!(matches!(config.media(), Err(RiloadError::EmptyMedia)));

        let config = RiloadConfig::new(BreakpointTable::new().with("small", BreakpointRange::at_most(480)));
        assert_eq!(config.media().unwrap().len(), 1);
    }

    #[test]
    fn test_from_json() {
        let config = RiloadConfig::from_json_str(
            r#"{
                "baseUrl": "/img/",
                "defer": "BelowFold",
                "retries": 2,
                "threshold": 50,
                "media": {
                    "small": { "maxWidth": 480 },
                    "large": { "minWidth": 481 }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "/img/");
        assert_eq!(config.defer, DeferMode::BelowFold);
        assert_eq!(config.retries, 2);
        assert_eq!(config.threshold, 50);
        assert_eq!(config.media().unwrap().resolve(320), "small");
    }

    #[test]
    fn test_defer_variants() {
        let parse = |json: &str| -> DeferMode { serde_json::from_str(json).unwrap() };
        assert_eq!(parse("false"), DeferMode::Immediate);
        assert_eq!(parse("true"), DeferMode::Immediate);
        assert_eq!(parse(r#""load""#), DeferMode::Load);
        assert_eq!(parse(r#""LOAD""#), DeferMode::Load);
        assert_eq!(parse(r#""belowfold""#), DeferMode::BelowFold);
        assert_eq!(parse(r#""sometime""#), DeferMode::Immediate);
    }

    #[test]
    fn test_defer_serializes_like_input() {
        assert_eq!(serde_json::to_string(&DeferMode::Immediate).unwrap(), "false");
        assert_eq!(serde_json::to_string(&DeferMode::BelowFold).unwrap(), r#""belowfold""#);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = RiloadConfig::from_json_str(r#"{ "retries": -1 }"#).unwrap_err();
        assert!(matches!(err, RiloadError::Parse(_)));
    }

    #[test]
    fn test_options_builder() {
        let options: Options<u32, u32> = Options::new(RiloadConfig::default())
            .parent_node(7)
            .on_load(|_| {});
        assert_eq!(options.parent_node, Some(7));
        assert!(options.on_load.is_some());
        assert!(options.on_error.is_none());
    }
}
