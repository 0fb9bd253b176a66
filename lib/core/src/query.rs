use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The matrix field a query addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Obs,
    Var,
    X,
    /// Primary embedding layout coordinates.
    Emb,
    /// Auxiliary (joint) projection, transmitted concatenated with the
    /// primary layout in one payload.
    JointEmb,
}

impl Field {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Obs => "obs",
            Field::Var => "var",
            Field::X => "X",
            Field::Emb => "emb",
            Field::JointEmb => "jemb",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "obs" => Ok(Field::Obs),
            "var" => Ok(Field::Var),
            "X" => Ok(Field::X),
            "emb" => Ok(Field::Emb),
            "jemb" => Ok(Field::JointEmb),
            _ => Err(Error::UnknownField(s.to_string())),
        }
    }
}

/// Row filter term: select rows of `field` where `column == value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WhereQuery {
    pub field: Field,
    pub column: String,
    pub value: String,
}

/// Summarization directive over a filter term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SummarizeQuery {
    pub method: String,
    pub field: Field,
    pub column: String,
    pub values: Vec<String>,
}

/// The unit of cache keying. Two structurally-equal queries encode to the
/// same canonical string and therefore dedupe to a single in-flight fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Query {
    /// Field plus a single column name.
    Simple { column: String },
    Where(WhereQuery),
    Summarize(SummarizeQuery),
}

impl Query {
    #[must_use]
    pub fn simple(column: &str) -> Query {
        Query::Simple {
            column: column.to_string(),
        }
    }

    #[must_use]
    pub fn where_value(field: Field, column: &str, value: &str) -> Query {
        Query::Where(WhereQuery {
            field,
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    #[inline]
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self, Query::Simple { .. })
    }

    pub fn expect_simple(&self) -> Result<&str> {
        match self {
            Query::Simple { column } => Ok(column),
            _ => Err(Error::InvalidQuery("expected a simple query".to_string())),
        }
    }

    pub fn expect_complex(&self) -> Result<&Query> {
        match self {
            Query::Simple { .. } => {
                Err(Error::InvalidQuery("expected a complex query".to_string()))
            }
            q => Ok(q),
        }
    }

    /// Canonical URL-encoded serialization of the query.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Query::Simple { column } => urlencoding::encode(column).into_owned(),
            Query::Where(w) => format!(
                "{}:{}={}",
                urlencoding::encode(w.field.as_str()),
                urlencoding::encode(&w.column),
                urlencoding::encode(&w.value)
            ),
            Query::Summarize(s) => {
                let values: Vec<String> = s
                    .values
                    .iter()
                    .map(|v| urlencoding::encode(v).into_owned())
                    .collect();
                format!(
                    "method={}&{}:{}={}",
                    urlencoding::encode(&s.method),
                    urlencoding::encode(s.field.as_str()),
                    urlencoding::encode(&s.column),
                    values.join(",")
                )
            }
        }
    }

    /// Cache key for this query evaluated against `field`.
    #[must_use]
    pub fn cache_key(&self, field: Field) -> String {
        format!("{}/{}", field.as_str(), self.encode())
    }
}

/// Stable short hash of encoded query strings, used to key POST requests
/// whose encoding exceeds the URL length cap.
#[must_use]
pub fn hash_query_strings(parts: &[&str]) -> String {
    // Fixed seeds: the key must be identical for identical encodings.
    let build = ahash::RandomState::with_seeds(7, 11, 13, 17);
    let mut hasher = build.build_hasher();
    for p in parts {
        p.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_queries_share_keys() {
        let a = Query::where_value(Field::Var, "name_0", "GENE/1");
        let b = Query::where_value(Field::Var, "name_0", "GENE/1");
        assert_eq!(a.cache_key(Field::X), b.cache_key(Field::X));
    }

    #[test]
    fn test_field_prefix_distinguishes_keys() {
        let q = Query::simple("name_0");
        assert_ne!(q.cache_key(Field::Obs), q.cache_key(Field::Var));
    }

    #[test]
    fn test_encode_escapes_values() {
        let q = Query::where_value(Field::Var, "name_0", "a b&c");
        assert_eq!(q.encode(), "var:name_0=a%20b%26c");
    }

    #[test]
    fn test_expectations() {
        let simple = Query::simple("x");
        assert!(simple.expect_simple().is_ok());
        assert!(simple.expect_complex().is_err());

        let complex = Query::where_value(Field::Var, "c", "v");
        assert!(complex.expect_simple().is_err());
        assert!(complex.expect_complex().is_ok());
    }

    #[test]
    fn test_hash_is_stable() {
        let h1 = hash_query_strings(&["method=mean&obs:type=a,b"]);
        let h2 = hash_query_strings(&["method=mean&obs:type=a,b"]);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }
}
