//! Topic layout for the energysync namespace
//!
//! ```text
//! energysync/appliances/<deviceId>   telemetry
//! energysync/control/<deviceId>      commands
//! energysync/appliances/+            aggregator subscription
//! energysync/control/#               dispatcher subscription
//! ```

use std::fmt;
use std::str::FromStr;

use super::error::TopicError;

/// First segment of every topic in the namespace
pub const ROOT: &str = "energysync";

/// Level separator
pub const SEPARATOR: char = '/';

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

fn is_reserved(c: char) -> bool {
    matches!(c, '/' | '+' | '#' | '\0')
}

fn validate_segment(segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() || segment.chars().any(is_reserved) {
        return Err(TopicError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

/// The two topic families below the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFamily {
    /// Telemetry published by simulators
    Appliances,
    /// Commands published by the presentation layer
    Control,
}

impl TopicFamily {
    pub fn segment(self) -> &'static str {
        match self {
            TopicFamily::Appliances => "appliances",
            TopicFamily::Control => "control",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "appliances" => Some(TopicFamily::Appliances),
            "control" => Some(TopicFamily::Control),
            _ => None,
        }
    }
}

/// Device identifier used as the last topic segment
///
/// Always a valid single topic level: non-empty, no separator, no wildcard
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self, TopicError> {
        let id = id.into();
        validate_segment(&id)?;
        Ok(Self(id))
    }

    /// Derives an id from an appliance display name
    ///
    /// Lower-cases the name and replaces only the *first* space with `_`.
    /// Later spaces are kept as-is and names differing only in case collide,
    /// so the original name cannot be recovered from the id.
    ///
    /// ```
    /// use energysync::codec::DeviceId;
    ///
    /// let id = DeviceId::from_display_name("Ceiling Fan").unwrap();
    /// assert_eq!(id.as_str(), "ceiling_fan");
    /// ```
    pub fn from_display_name(name: &str) -> Result<Self, TopicError> {
        Self::new(name.to_lowercase().replacen(' ', "_", 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-case label for log output (first `_` shown as a space)
    pub fn display_label(&self) -> String {
        self.0.replacen('_', " ", 1).to_uppercase()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Concrete topic: `energysync/<family>/<deviceId>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    family: TopicFamily,
    device_id: DeviceId,
}

impl TopicPath {
    pub fn new(family: TopicFamily, device_id: DeviceId) -> Self {
        Self { family, device_id }
    }

    pub fn family(&self) -> TopicFamily {
        self.family
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Ordered topic levels
    pub fn segments(&self) -> [&str; 3] {
        [ROOT, self.family.segment(), self.device_id.as_str()]
    }

    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::Empty);
        }

        let outside = || TopicError::OutsideNamespace(topic.to_string());
        let mut levels = topic.split(SEPARATOR);

        if levels.next() != Some(ROOT) {
            return Err(outside());
        }
        let family = levels
            .next()
            .and_then(TopicFamily::from_segment)
            .ok_or_else(outside)?;
        let device = levels.next().ok_or_else(outside)?;
        if levels.next().is_some() {
            return Err(outside());
        }

        Ok(Self::new(family, DeviceId::new(device)?))
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ROOT}{SEPARATOR}{}{SEPARATOR}{}",
            self.family.segment(),
            self.device_id
        )
    }
}

impl FromStr for TopicPath {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub fn encode_telemetry_topic(device_id: &DeviceId) -> TopicPath {
    TopicPath::new(TopicFamily::Appliances, device_id.clone())
}

pub fn encode_control_topic(device_id: &DeviceId) -> TopicPath {
    TopicPath::new(TopicFamily::Control, device_id.clone())
}

/// Subscription pattern with MQTT wildcard rules
///
/// `+` matches exactly one level and must occupy a whole level. `#` matches
/// the remaining levels (including none) and must be the whole last level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn new(filter: impl Into<String>) -> Result<Self, TopicError> {
        let filter = filter.into();
        if filter.is_empty() {
            return Err(TopicError::Empty);
        }

        let level_count = filter.split(SEPARATOR).count();
        for (index, level) in filter.split(SEPARATOR).enumerate() {
            if level.contains('\0') {
                return Err(TopicError::InvalidSegment(level.to_string()));
            }
            let misplaced_multi =
                level.contains('#') && (level != MULTI_LEVEL || index + 1 != level_count);
            let misplaced_single = level.contains('+') && level != SINGLE_LEVEL;
            if misplaced_multi || misplaced_single {
                return Err(TopicError::MisplacedWildcard(filter));
            }
        }

        Ok(Self(filter))
    }

    /// `energysync/control/#`
    pub fn all_control() -> Self {
        Self(format!(
            "{ROOT}{SEPARATOR}{}{SEPARATOR}{MULTI_LEVEL}",
            TopicFamily::Control.segment()
        ))
    }

    /// `energysync/appliances/+`
    pub fn all_telemetry() -> Self {
        Self(format!(
            "{ROOT}{SEPARATOR}{}{SEPARATOR}{SINGLE_LEVEL}",
            TopicFamily::Appliances.segment()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_wildcard(&self) -> bool {
        self.0
            .split(SEPARATOR)
            .any(|level| level == SINGLE_LEVEL || level == MULTI_LEVEL)
    }

    /// Whether a concrete topic name is selected by this filter
    pub fn matches(&self, topic: &str) -> bool {
        let mut filter_levels = self.0.split(SEPARATOR);
        let mut topic_levels = topic.split(SEPARATOR);

        // `$SYS`-style topics are never matched by a leading wildcard
        if topic.starts_with('$') && self.0.starts_with(|c| c == '+' || c == '#') {
            return false;
        }

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some(MULTI_LEVEL), _) => return true,
                (Some(SINGLE_LEVEL), Some(_)) => continue,
                (Some(filter), Some(level)) if filter == level => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
