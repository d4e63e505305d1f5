use std::fmt;

use serde::Deserialize;

/// Credentials embedded in every request body.
#[derive(Clone, Deserialize)]
pub struct AuthHeader {
    pub customer_key: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub practice_id: Option<String>,
}

impl AuthHeader {
    pub fn new(
        customer_key: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            customer_key: customer_key.into(),
            user: user.into(),
            password: password.into(),
            practice_id: None,
        }
    }

    #[must_use]
    pub fn with_practice_id(mut self, practice_id: impl Into<String>) -> Self {
        self.practice_id = Some(practice_id.into());
        self
    }

    /// Header elements in schema order.
    pub(crate) fn elements(&self) -> Vec<(&'static str, &str)> {
        let mut elements = vec![
            ("CustomerKey", self.customer_key.as_str()),
            ("User", self.user.as_str()),
            ("Password", self.password.as_str()),
        ];
        if let Some(practice_id) = self.practice_id.as_deref() {
            elements.push(("PracticeId", practice_id));
        }
        elements
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeader")
            .field("customer_key", &"***")
            .field("user", &self.user)
            .field("password", &"***")
            .field("practice_id", &self.practice_id)
            .finish()
    }
}
