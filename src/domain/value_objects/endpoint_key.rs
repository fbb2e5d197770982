use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key for a remote-read result, derived from the request path.
///
/// Two requests for the same logical resource must normalize to the same
/// key, so every non-alphanumeric byte is mapped to `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn from_path(path: &str) -> Self {
        let normalized: String = path
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EndpointKey> for String {
    fn from(key: EndpointKey) -> Self {
        key.0
    }
}
