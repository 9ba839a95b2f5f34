//! Token substitution in query templates.
//!
//! Two token families are recognized:
//!
//! - named tokens `IRODS_TOKEN_<NAME>_END_TOKEN`, filled from a
//!   [`SubstitutionContext`]; the two leaf-bundle tokens expand to a quoted,
//!   comma-separated list of leaf resource ids;
//! - positional tokens `{0}`, `{1}`, ... filled from the row that triggered
//!   this invocation.

use serde_json::Value;

use crate::error::ErrorCode;
use crate::services::{ResourceManager, ServiceError};

const TOKEN_PREFIX: &str = "IRODS_TOKEN_";
const TOKEN_SUFFIX: &str = "_END_TOKEN";

/// Marks a parameter whose value comes from a nested query.
pub const QUERY_SUBSTITUTION_TOKEN: &str = "IRODS_TOKEN_QUERY_SUBSTITUTION_END_TOKEN";

/// Errors raised while substituting tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstitutionError {
    /// A token name is not recognized.
    #[error("unknown token [{token}] in query [{query}]")]
    UnknownToken {
        /// Token as written.
        token: String,
        /// Query being substituted.
        query: String,
    },
    /// A token prefix has no matching `_END_TOKEN`.
    #[error("missing _END_TOKEN in query [{query}]")]
    Unterminated {
        /// Query being substituted.
        query: String,
    },
    /// The leaf bundle of a resource could not be computed.
    #[error("failed to compute leaf bundle for [{resource}]: {detail}")]
    LeafBundle {
        /// Resource whose leaves were requested.
        resource: String,
        /// What went wrong.
        detail: String,
    },
}

impl SubstitutionError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LeafBundle { .. } => ErrorCode::InvalidResource,
            _ => ErrorCode::InvalidInputParam,
        }
    }
}

/// Named substitution tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Current time, seconds since the epoch.
    CurrentTime,
    /// Current time minus the configured lifetime.
    Lifetime,
    /// Acting user.
    UserName,
    /// Collection of the object, or the collection itself.
    CollectionName,
    /// Object name; empty for collections.
    DataName,
    /// Source resource name.
    SourceResource,
    /// Destination resource name.
    DestinationResource,
    /// Leaf ids beneath the source resource.
    SourceResourceLeafBundle,
    /// Leaf ids beneath the destination resource.
    DestinationResourceLeafBundle,
}

impl Token {
    /// Every named token.
    pub const ALL: [Self; 9] = [
        Self::CurrentTime,
        Self::Lifetime,
        Self::UserName,
        Self::CollectionName,
        Self::DataName,
        Self::SourceResource,
        Self::DestinationResource,
        Self::SourceResourceLeafBundle,
        Self::DestinationResourceLeafBundle,
    ];

    /// Full token text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentTime => "IRODS_TOKEN_CURRENT_TIME_END_TOKEN",
            Self::Lifetime => "IRODS_TOKEN_LIFETIME_END_TOKEN",
            Self::UserName => "IRODS_TOKEN_USER_NAME_END_TOKEN",
            Self::CollectionName => "IRODS_TOKEN_COLLECTION_NAME_END_TOKEN",
            Self::DataName => "IRODS_TOKEN_DATA_NAME_END_TOKEN",
            Self::SourceResource => "IRODS_TOKEN_SOURCE_RESOURCE_END_TOKEN",
            Self::DestinationResource => "IRODS_TOKEN_DESTINATION_RESOURCE_END_TOKEN",
            Self::SourceResourceLeafBundle => "IRODS_TOKEN_SOURCE_RESOURCE_LEAF_BUNDLE_END_TOKEN",
            Self::DestinationResourceLeafBundle => {
                "IRODS_TOKEN_DESTINATION_RESOURCE_LEAF_BUNDLE_END_TOKEN"
            }
        }
    }

    /// Look up a token by its full text.
    pub fn from_text(text: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == text)
    }
}

/// Values available to named tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionContext {
    /// Seconds since the epoch.
    pub current_time: i64,
    /// Cutoff timestamp: current time minus the lifetime, or `0` without one.
    pub lifetime: i64,
    /// Acting user.
    pub user_name: String,
    /// Collection name.
    pub collection_name: String,
    /// Data object name.
    pub data_name: String,
    /// Source resource.
    pub source_resource: String,
    /// Destination resource.
    pub destination_resource: String,
}

impl SubstitutionContext {
    fn value_for(
        &self,
        token: Token,
        resources: &dyn ResourceManager,
    ) -> Result<String, SubstitutionError> {
        let value = match token {
            Token::CurrentTime => self.current_time.to_string(),
            Token::Lifetime => self.lifetime.to_string(),
            Token::UserName => self.user_name.clone(),
            Token::CollectionName => self.collection_name.clone(),
            Token::DataName => self.data_name.clone(),
            Token::SourceResource => self.source_resource.clone(),
            Token::DestinationResource => self.destination_resource.clone(),
            Token::SourceResourceLeafBundle => leaf_bundle(resources, &self.source_resource)?,
            Token::DestinationResourceLeafBundle => {
                leaf_bundle(resources, &self.destination_resource)?
            }
        };
        Ok(value)
    }
}

/// Quoted, comma-separated leaf ids beneath `resource`, e.g. `'10', '11'`.
pub fn leaf_bundle(
    resources: &dyn ResourceManager,
    resource: &str,
) -> Result<String, SubstitutionError> {
    let to_error = |detail: String| SubstitutionError::LeafBundle {
        resource: resource.to_owned(),
        detail,
    };
    let ids = resources
        .leaf_bundle(resource)
        .map_err(|e: ServiceError| to_error(e.to_string()))?;
    if ids.is_empty() {
        return Err(to_error("resource has no leaves".to_owned()));
    }
    Ok(ids
        .iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", "))
}

/// Replace every named token in `query`.
pub fn replace_named_tokens(
    query: &str,
    context: &SubstitutionContext,
    resources: &dyn ResourceManager,
) -> Result<String, SubstitutionError> {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;
    while let Some(start) = rest.find(TOKEN_PREFIX) {
        let (before, from_token) = rest.split_at(start);
        out.push_str(before);

        let body = &from_token[TOKEN_PREFIX.len()..];
        let Some((name, tail)) = body.split_once(TOKEN_SUFFIX) else {
            return Err(SubstitutionError::Unterminated {
                query: query.to_owned(),
            });
        };
        let text = format!("{TOKEN_PREFIX}{name}{TOKEN_SUFFIX}");
        let token = Token::from_text(&text).ok_or_else(|| SubstitutionError::UnknownToken {
            token: text.clone(),
            query: query.to_owned(),
        })?;
        out.push_str(&context.value_for(token, resources)?);
        rest = tail;
    }
    out.push_str(rest);
    Ok(out)
}

/// Replace `{0}`, `{1}`, ... with the corresponding entries of `results`.
pub fn replace_positional_tokens(query: &str, results: &[String]) -> String {
    results
        .iter()
        .enumerate()
        .fold(query.to_owned(), |acc, (i, value)| {
            acc.replace(&format!("{{{i}}}"), value)
        })
}

/// Whether a parameter value embeds a nested query.
pub fn requires_query_substitution(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.contains(QUERY_SUBSTITUTION_TOKEN))
}

/// The nested query inside `IRODS_TOKEN_QUERY_SUBSTITUTION_END_TOKEN(<query>)`.
pub fn extract_substitution_query(text: &str) -> Option<&str> {
    let (_, after) = text.split_once(QUERY_SUBSTITUTION_TOKEN)?;
    let mut chars = after.chars();
    chars.next()?;
    let (query, _) = chars.as_str().split_once(')')?;
    Some(query)
}
