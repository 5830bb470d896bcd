//! Query model: the structured request, its candidates, and the result
//! items resolvers produce in response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace anchoring deterministic QID derivation (uuid v5). Any fixed
/// UUID works here as long as every node uses the same one; this one is
/// arbitrary but stable.
const QID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x50, 0x6c, 0x61, 0x79, 0x64, 0x61, 0x72, 0x00, 0x51, 0x49, 0x44, 0x4e, 0x53, 0x00, 0x00, 0x01,
]);

/// A content-addressed, stable query identifier. Immutable for the life of
/// the query; identical logical queries on any node derive the same QID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qid(pub Uuid);

impl Qid {
    pub fn new_random() -> Self {
        Qid(Uuid::new_v4())
    }
}

impl std::fmt::Display for Qid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Qid {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Qid(Uuid::parse_str(s)?))
    }
}

/// A locally-unique handle to bytes retrievable at `/sid/<sid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(pub String);

impl Sid {
    pub fn new_random() -> Self {
        Sid(Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One candidate (artist, album?, track) triple. A [`Query`] carries one or
/// more of these; the first is authoritative for QID derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub track: String,
}

impl Candidate {
    fn normalized_key(&self) -> String {
        let norm = |s: &str| s.trim().to_lowercase();
        format!(
            "{}\u{1}{}\u{1}{}",
            norm(&self.artist),
            self.album.as_deref().map(norm).unwrap_or_default(),
            norm(&self.track)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Normal,
    Redirect,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Normal
    }
}

/// An immutable description of what's wanted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Caller-supplied QID takes priority over derivation; the registry
    /// treats it as authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qid: Option<Qid>,
}

impl Query {
    pub fn new(candidate: Candidate) -> Self {
        Query {
            candidates: vec![candidate],
            mode: QueryMode::Normal,
            source_name: None,
            qid: None,
        }
    }

    /// The query's stable identifier: the caller-supplied one if present,
    /// else deterministically derived from the first candidate.
    pub fn qid(&self) -> Qid {
        match self.qid {
            Some(qid) => qid,
            None => derive_qid(&self.candidates[0]),
        }
    }
}

/// Deterministic QID derivation: normalize, concatenate, hash into a
/// uniform 128-bit space, format as canonical UUID text. UUID v5
/// (namespace + SHA-1) gives us exactly this, for free and idiomatically.
pub fn derive_qid(candidate: &Candidate) -> Qid {
    Qid(Uuid::new_v5(&QID_NAMESPACE, candidate.normalized_key().as_bytes()))
}

/// A candidate answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ri {
    pub source: String,
    pub score: f32,
    pub bitrate: u32,
    pub duration_ms: u32,
    pub size_bytes: u64,
    pub mimetype: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub track: String,
    pub sid: Sid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Ri {
    /// Identity used for de-duplication: a repeated arrival of the same
    /// (source, sid) pair is dropped silently by the registry.
    pub fn dedupe_key(&self) -> (String, Sid) {
        (self.source.clone(), self.sid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(artist: &str, track: &str) -> Candidate {
        Candidate {
            artist: artist.to_string(),
            album: None,
            track: track.to_string(),
        }
    }

    #[test]
    fn qid_is_deterministic_across_instances() {
        let a = derive_qid(&candidate("Joy Division", "Atmosphere"));
        let b = derive_qid(&candidate("Joy Division", "Atmosphere"));
        assert_eq!(a, b);
    }

    #[test]
    fn qid_is_case_and_whitespace_insensitive() {
        let a = derive_qid(&candidate("Joy Division", "Atmosphere"));
        let b = derive_qid(&candidate("  joy division  ", "ATMOSPHERE"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_tracks_yield_different_qids() {
        let a = derive_qid(&candidate("Joy Division", "Atmosphere"));
        let b = derive_qid(&candidate("Joy Division", "Disorder"));
        assert_ne!(a, b);
    }

    #[test]
    fn ri_json_roundtrip_ignoring_url() {
        let ri = Ri {
            source: "nodeA".into(),
            score: 0.95,
            bitrate: 320,
            duration_ms: 210_000,
            size_bytes: 8_000_000,
            mimetype: "audio/mpeg".into(),
            artist: "Joy Division".into(),
            album: Some("Unknown Pleasures".into()),
            track: "Disorder".into(),
            sid: Sid("s1".into()),
            url: None,
        };
        let json = serde_json::to_string(&ri).unwrap();
        let back: Ri = serde_json::from_str(&json).unwrap();
        assert_eq!(ri, back);
    }
}
