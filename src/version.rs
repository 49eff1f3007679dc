use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed version {0:?}: expected 2 or 3 dot-separated components")]
    Malformed(String),
    #[error("malformed major version in {0:?}")]
    Major(String),
    #[error("malformed minor version in {0:?}")]
    Minor(String),
    #[error("malformed channel number in {0:?}")]
    ChannelNumber(String),
    #[error("malformed build number in {0:?}")]
    Build(String),
}

/// Release maturity tier. Declared oldest-first so the derived order ranks
/// release above release candidate above beta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Beta(u32),
    ReleaseCandidate(u32),
    Release,
}

/// A Go version tag with the `go` prefix stripped: `1.10.3`, `1.18`,
/// `1.11beta2`, `2.12rc4`.
///
/// Equality, hashing and ordering only look at `major`, `minor`, `build` and
/// `channel`. Whether the build was written out (`1.18` vs `1.18.0`) only
/// changes how the value is displayed.
#[derive(Debug, Clone, Copy)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub channel: Channel,
    build_written: bool,
}

impl VersionInfo {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(ParseError::Malformed(text.to_string()));
        }

        let major = parts[0]
            .parse()
            .map_err(|_| ParseError::Major(text.to_string()))?;

        let (minor, channel) = if let Some((minor, number)) = parts[1].split_once("beta") {
            (parse_minor(minor, text)?, Channel::Beta(parse_channel_number(number, text)?))
        } else if let Some((minor, number)) = parts[1].split_once("rc") {
            (
                parse_minor(minor, text)?,
                Channel::ReleaseCandidate(parse_channel_number(number, text)?),
            )
        } else {
            (parse_minor(parts[1], text)?, Channel::Release)
        };

        let build = match parts.get(2) {
            Some(build) => build.parse().map_err(|_| ParseError::Build(text.to_string()))?,
            None => 0,
        };

        Ok(Self { major, minor, build, channel, build_written: parts.len() == 3 })
    }

    pub fn is_beta(&self) -> bool {
        self.beta_number().is_some()
    }

    pub fn beta_number(&self) -> Option<u32> {
        match self.channel {
            Channel::Beta(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_rc(&self) -> bool {
        self.rc_number().is_some()
    }

    pub fn rc_number(&self) -> Option<u32> {
        match self.channel {
            Channel::ReleaseCandidate(n) => Some(n),
            _ => None,
        }
    }

    /// True when `other` is on the same major/minor line.
    pub fn same_line(&self, other: &VersionInfo) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    fn key(&self) -> (u32, u32, u32, Channel) {
        (self.major, self.minor, self.build, self.channel)
    }
}

fn parse_minor(minor: &str, text: &str) -> Result<u32, ParseError> {
    minor.parse().map_err(|_| ParseError::Minor(text.to_string()))
}

// `u32::from_str` rejects the empty string, so `1.18rc` fails here.
fn parse_channel_number(number: &str, text: &str) -> Result<u32, ParseError> {
    number.parse().map_err(|_| ParseError::ChannelNumber(text.to_string()))
}

impl FromStr for VersionInfo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Channel::Beta(n) => write!(f, "{}.{}beta{}", self.major, self.minor, n),
            Channel::ReleaseCandidate(n) => write!(f, "{}.{}rc{}", self.major, self.minor, n),
            Channel::Release if !self.build_written && self.build == 0 => {
                write!(f, "{}.{}", self.major, self.minor)
            }
            Channel::Release => write!(f, "{}.{}.{}", self.major, self.minor, self.build),
        }
    }
}

impl PartialEq for VersionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for VersionInfo {}

impl Hash for VersionInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for VersionInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for VersionInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Only the parser builds values at runtime; tests need literals.
#[cfg(test)]
impl VersionInfo {
    pub fn release(major: u32, minor: u32, build: u32) -> Self {
        Self { major, minor, build, channel: Channel::Release, build_written: true }
    }

    pub fn beta(major: u32, minor: u32, number: u32) -> Self {
        Self { major, minor, build: 0, channel: Channel::Beta(number), build_written: false }
    }

    pub fn release_candidate(major: u32, minor: u32, number: u32) -> Self {
        Self {
            major,
            minor,
            build: 0,
            channel: Channel::ReleaseCandidate(number),
            build_written: false,
        }
    }
}

/// Sort in place with the newest version first.
pub fn sort_newest_first(versions: &mut [VersionInfo]) {
    versions.sort_by(|a, b| b.cmp(a));
}
