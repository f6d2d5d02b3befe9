use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who wrote a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Admin,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Admin => "admin",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "admin" => Ok(Sender::Admin),
            other => Err(format!("invalid sender: {other}")),
        }
    }
}

/// Descriptive fields of the person behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_name: String,
    pub user_plan: String,
    pub is_logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            user_name: "Anonymous".to_string(),
            user_plan: "free".to_string(),
            is_logged_in: false,
            country_code: None,
            country_name: None,
        }
    }
}

/// Partial profile change; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub user_name: Option<String>,
    pub user_plan: Option<String>,
    pub is_logged_in: Option<bool>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.user_name.is_none()
            && self.user_plan.is_none()
            && self.is_logged_in.is_none()
            && self.country_code.is_none()
            && self.country_name.is_none()
    }

    pub fn apply(self, profile: &mut UserProfile) {
        if let Some(name) = self.user_name {
            profile.user_name = name;
        }
        if let Some(plan) = self.user_plan {
            profile.user_plan = plan;
        }
        if let Some(logged_in) = self.is_logged_in {
            profile.is_logged_in = logged_in;
        }
        if let Some(code) = self.country_code {
            profile.country_code = Some(code);
        }
        if let Some(name) = self.country_name {
            profile.country_name = Some(name);
        }
    }
}
