use std::collections::BTreeSet;

/// The signed-in user a form acts on behalf of.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub roles: BTreeSet<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn role(mut self, value: impl Into<String>) -> Self {
        self.roles.insert(value.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Explicit context handed to an orchestrator at construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FormContext {
    pub current_user: Option<CurrentUser>,
}

impl FormContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: CurrentUser) -> Self {
        Self {
            current_user: Some(user),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.current_user.as_ref().map(|user| user.id.as_str())
    }
}
