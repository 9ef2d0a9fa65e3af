use serde::Serialize;

use crate::models::user::{Role, User};

/// The authenticated caller, attached to a request by the authentication gate.
///
/// A snapshot of the credential store at gate time.
#[derive(Clone, Debug, Serialize)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub enabled: bool,
}

impl Principal {
    pub fn authority(&self) -> String {
        self.role.authority()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            enabled: user.enabled,
        }
    }
}
