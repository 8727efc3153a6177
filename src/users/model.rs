//! User records and request payloads.

use serde::{Deserialize, Serialize};

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// Body accepted by `POST /users` and `PUT /users/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UserInput {
    pub name: Option<String>,
}

impl UserInput {
    /// The trimmed name, if one was given and it is not blank.
    pub fn into_name(self) -> Option<String> {
        self.name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }
}
