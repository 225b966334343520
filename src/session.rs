//! The authenticated caller, as handed over by the sign-in layer.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  #[default]
  Standard,
}

#[derive(Clone)]
pub struct Session {
  pub user_id: u64,
  /// Employee record linked to the user, if any
  pub employee_id: Option<u64>,
  pub role: Role,
  credential: String,
}

impl Session {
  pub fn new(user_id: u64, employee_id: Option<u64>, role: Role, credential: impl Into<String>) -> Self {
    Self {
      user_id,
      employee_id,
      role,
      credential: credential.into(),
    }
  }

  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }

  /// Identity that tickets created by this session are owned by.
  pub fn owner_id(&self) -> u64 {
    self.employee_id.unwrap_or(self.user_id)
  }

  pub fn credential(&self) -> &str {
    &self.credential
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("user_id", &self.user_id)
      .field("employee_id", &self.employee_id)
      .field("role", &self.role)
      .field("credential", &"<redacted>")
      .finish()
  }
}
