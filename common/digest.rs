use crate::error::DigestError;
use once_cell::sync::Lazy;
use regex::Regex;

static DIGEST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^(?:([0-9a-zA-Z._-]+)/)?([0-9a-f]+):([0-9]+)$")
        .expect("Failed to compile digest regex")
});

/// Content identifier: hash, declared byte length, and the instance name of
/// the storage namespace the blob lives in. Equality is structural over all
/// three fields.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Digest {
    instance: String,
    hash: String,
    size_bytes: i64,
}

// External creation goes through `new` or the validation logic in FromStr;
// the fields themselves stay private.
impl Digest {
    pub fn new(
        instance: impl Into<String>,
        hash: impl Into<String>,
        size_bytes: i64,
    ) -> Digest {
        Digest {
            instance: instance.into(),
            hash: hash.into(),
            size_bytes,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}:{}", self.hash, self.size_bytes)
        } else {
            write!(f, "{}/{}:{}", self.instance, self.hash, self.size_bytes)
        }
    }
}

impl std::str::FromStr for Digest {
    type Err = DigestError;

    fn from_str(digest: &str) -> Result<Digest, Self::Err> {
        let matches = DIGEST_REGEX
            .captures(digest)
            .ok_or_else(|| DigestError::InvalidDigest(digest.to_string()))?;
        Ok(Digest {
            instance: matches
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            hash: matches[2].to_string(),
            size_bytes: matches[3]
                .parse::<i64>()
                .map_err(|_| DigestError::InvalidDigest(digest.to_string()))?,
        })
    }
}
