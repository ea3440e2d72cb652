use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Developer,
}

/// A seeded platform user.
///
/// `password` holds an opaque credential hash; the seeder never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password: String,
    #[serde(default = "default_verified")]
    pub verified: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
}

fn default_verified() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_defaults_and_role_order() {
        let user: User = serde_json::from_value(json!({
            "_id": "u1",
            "email": "a@opsflow.com",
            "username": "a",
            "fullName": "A",
            "password": "hash",
            "roles": ["DEVELOPER", "ADMIN"]
        }))
        .unwrap();

        assert!(user.verified);
        assert_eq!(user.avatar_url, None);
        assert!(user.roles.contains(&Role::Admin));

        let body = serde_json::to_value(&user).unwrap();
        assert_eq!(body["roles"], json!(["ADMIN", "DEVELOPER"]));
        assert_eq!(body["fullName"], json!("A"));
        assert_eq!(body["_id"], json!("u1"));
    }

    #[test]
    fn test_user_rejects_unknown_fields() {
        let result = serde_json::from_value::<User>(json!({
            "_id": "u1",
            "email": "a@opsflow.com",
            "username": "a",
            "fullName": "A",
            "password": "hash",
            "nickname": "aa"
        }));
        assert!(result.is_err());
    }
}
