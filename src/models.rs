// Core data structures shared by the scheduler, platforms and delivery

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer category of a post within one platform (e.g. "video", "repost")
pub type Category = i32;

/// Free-text label on a post used for subscriber-side filtering
pub type Tag = String;

/// Opaque identifier of one remote entity tracked within a platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Target used by platforms that have nothing to track per entity
    pub fn empty() -> Self {
        Self(String::new())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Key used by the weight lookup: `"{platform_name}-{target}"`
pub fn weight_key(platform_name: &str, target: &Target) -> String {
    format!("{platform_name}-{target}")
}

/// Identity of a message recipient on some chat transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One subscriber's filter preference for one target
///
/// Tags prefixed with `~` are banned tags; all others are subscribed tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubInfo {
    pub user: Recipient,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl UserSubInfo {
    pub fn new(user: Recipient, categories: Vec<Category>, tags: Vec<Tag>) -> Self {
        Self {
            user,
            categories,
            tags,
        }
    }
}

/// A target together with everyone subscribed to it
#[derive(Debug, Clone)]
pub struct SubUnit {
    pub sub_target: Target,
    pub user_sub_infos: Vec<UserSubInfo>,
}

impl SubUnit {
    pub fn new(sub_target: Target, user_sub_infos: Vec<UserSubInfo>) -> Self {
        Self {
            sub_target,
            user_sub_infos,
        }
    }
}

/// Normalized post handed to rendering and delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub platform_name: String,
    pub title: Option<String>,
    pub content: String,
    pub url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub nickname: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(platform_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            platform_name: platform_name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.platform_name)?;
        if let Some(title) = &self.title {
            write!(f, " {title}")?;
        }
        if let Some(url) = &self.url {
            write!(f, " <{url}>")?;
        }
        Ok(())
    }
}

/// Time-of-day weight override, active for `start_time <= t < end_time`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWeightConfig {
    #[serde(rename = "start", with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(rename = "end", with = "hhmm")]
    pub end_time: NaiveTime,
    pub weight: u32,
}

/// Per-target scheduling weight: a default plus ordered time overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub default: u32,
    #[serde(default)]
    pub time_config: Vec<TimeWeightConfig>,
}

/// Weight given to a freshly subscribed target
pub const DEFAULT_SCHEDULE_WEIGHT: u32 = 10;

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_SCHEDULE_WEIGHT,
            time_config: Vec::new(),
        }
    }
}

impl WeightConfig {
    /// Weight in effect at the given time of day.
    ///
    /// Overrides are checked in configured order and the first one that
    /// covers `time` wins, even when later entries overlap it.
    pub fn weight_at(&self, time: NaiveTime) -> u32 {
        self.time_config
            .iter()
            .find(|conf| conf.start_time <= time && time < conf.end_time)
            .map(|conf| conf.weight)
            .unwrap_or(self.default)
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_weight_key_format() {
        assert_eq!(weight_key("rss", &Target::new("abc")), "rss-abc");
    }

    #[test]
    fn test_weight_at_default() {
        let conf = WeightConfig::default();
        assert_eq!(conf.weight_at(t(3, 0)), DEFAULT_SCHEDULE_WEIGHT);
    }

    #[test]
    fn test_weight_at_override_half_open() {
        let conf = WeightConfig {
            default: 10,
            time_config: vec![TimeWeightConfig {
                start_time: t(8, 0),
                end_time: t(12, 0),
                weight: 40,
            }],
        };
        assert_eq!(conf.weight_at(t(7, 59)), 10);
        assert_eq!(conf.weight_at(t(8, 0)), 40);
        assert_eq!(conf.weight_at(t(11, 59)), 40);
        assert_eq!(conf.weight_at(t(12, 0)), 10);
    }

    #[test]
    fn test_weight_at_first_match_wins() {
        let conf = WeightConfig {
            default: 1,
            time_config: vec![
                TimeWeightConfig {
                    start_time: t(9, 0),
                    end_time: t(18, 0),
                    weight: 5,
                },
                TimeWeightConfig {
                    start_time: t(10, 0),
                    end_time: t(11, 0),
                    weight: 50,
                },
            ],
        };
        assert_eq!(conf.weight_at(t(10, 30)), 5);
    }

    #[test]
    fn test_time_weight_toml_roundtrip_format() {
        let conf: WeightConfig = toml::from_str(
            r#"
default = 10
time_config = [{ start = "08:00", end = "12:30", weight = 20 }]
"#,
        )
        .unwrap();
        assert_eq!(conf.time_config[0].end_time, t(12, 30));
        assert_eq!(conf.time_config[0].weight, 20);
    }

    #[test]
    fn test_post_display() {
        let post = Post::new("rss", "body")
            .with_title("Hello")
            .with_url("https://example.com/1");
        assert_eq!(post.to_string(), "[rss] Hello <https://example.com/1>");
    }
}
