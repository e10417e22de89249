//! Response shape validation for API tests

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{E2eError, E2eResult};

const SNIPPET_LEN: usize = 300;

/// Checks beyond what deserialization enforces
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub user_id: i64,
    pub id: i64,
    pub title: String,
    pub body: String,
}

impl Validate for Post {
    fn validate(&self) -> Result<(), String> {
        if self.user_id <= 0 {
            return Err(format!("userId must be greater than 0, got {}", self.user_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostList(pub Vec<Post>);

impl Validate for PostList {
    fn validate(&self) -> Result<(), String> {
        for (i, post) in self.0.iter().enumerate() {
            post.validate().map_err(|e| format!("[{}]: {}", i, e))?;
        }
        Ok(())
    }
}

/// Validate `data` as a `T`
///
/// With `raise_on_error` a failure becomes a test assertion failure that
/// quotes the offending data; otherwise the raw validation error is
/// returned for the caller to inspect.
pub fn validate_response<T>(data: &Value, raise_on_error: bool) -> E2eResult<T>
where
    T: DeserializeOwned + Validate,
{
    let checked = T::deserialize(data)
        .map_err(|e| e.to_string())
        .and_then(|value| value.validate().map(|()| value));

    match checked {
        Ok(value) => Ok(value),
        Err(reason) if raise_on_error => Err(E2eError::AssertionFailed(format!(
            "Validation failed for data: {}\n{}",
            snippet(data),
            reason
        ))),
        Err(reason) => Err(E2eError::Validation(reason)),
    }
}

fn snippet(data: &Value) -> String {
    let text = data.to_string();
    match text.char_indices().nth(SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
