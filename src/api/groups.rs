//! Expense-sharing group endpoints
//!
//! Group payloads differ between backend versions: members arrive as bare
//! user ids or as user objects, and several names are used for the image
//! and description. Everything is mapped onto [`Group`] before decoding.

use serde_json::{json, Map, Value};

use super::client::ApiClient;
use super::error::ApiError;
use super::request::OutboundRequest;
use crate::models::Group;

const GROUPS_PATH: &str = "/api/v1/groups";

const IMAGE_ALIASES: &[&str] = &[
    "imageUrl",
    "image_url",
    "image",
    "photoUrl",
    "avatarUrl",
    "iconUrl",
    "pictureUrl",
    "picture",
];
const DESCRIPTION_ALIASES: &[&str] = &["description", "desc", "about", "details", "summary"];

#[derive(Clone)]
pub struct GroupService {
    client: ApiClient,
}

impl GroupService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Groups the user belongs to. Failures other than auth errors yield an
    /// empty list, as do records without a numeric id.
    pub async fn list(&self) -> Result<Vec<Group>, ApiError> {
        let result = self
            .client
            .send(&OutboundRequest::get(GROUPS_PATH))
            .await
            .and_then(|resp| resp.value());

        let body = match result {
            Ok(body) => body,
            Err(e) if e.is_auth_error() => return Err(e),
            Err(e) => {
                tracing::warn!("Could not load groups: {}", e);
                return Ok(Vec::new());
            }
        };

        let records = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let total = records.len();
        let groups: Vec<Group> = records
            .into_iter()
            .filter_map(|raw| {
                let id = raw.get("id").and_then(Value::as_i64)?;
                serde_json::from_value(normalize(raw, id)).ok()
            })
            .collect();
        if groups.len() < total {
            tracing::warn!("Skipped {} malformed groups", total - groups.len());
        }
        Ok(groups)
    }

    /// One group with its members. Groups span companies, so the request is
    /// not tenant scoped.
    pub async fn get(&self, id: i64) -> Result<Group, ApiError> {
        let raw = self
            .client
            .send(&OutboundRequest::get(format!("{}/{}", GROUPS_PATH, id)).skip_tenant_scope(true))
            .await?
            .value()?;
        serde_json::from_value(normalize(raw, id)).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k)?.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Members are either user ids or user objects. Objects without a usable
/// id get a negative placeholder so they can still be listed.
fn normalize_member(raw: &Value, index: usize) -> Option<Value> {
    let map = match raw {
        Value::Number(n) => {
            let id = n.as_i64()?;
            return Some(json!({ "id": id, "name": format!("User #{}", id), "email": "" }));
        }
        Value::Object(map) => map,
        _ => return None,
    };

    let id = ["id", "userId", "uid"]
        .iter()
        .find_map(|k| map.get(*k)?.as_i64())
        .unwrap_or(-(index as i64 + 1));
    let email = first_text(map, &["email", "emailAddress", "username"]).unwrap_or_default();
    let name = first_text(map, &["name", "fullName", "displayName"])
        .or_else(|| Some(email.clone()).filter(|e| !e.is_empty()))
        .unwrap_or_else(|| format!("User #{}", id));
    let role = first_text(map, &["role", "userRole"]);

    Some(json!({ "id": id, "name": name, "email": email, "role": role }))
}

fn normalize(raw: Value, fallback_id: i64) -> Value {
    let map = match raw {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let id = map.get("id").and_then(Value::as_i64).unwrap_or(fallback_id);
    let members: Vec<Value> = map
        .get("members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .enumerate()
                .filter_map(|(i, m)| normalize_member(m, i))
                .collect()
        })
        .unwrap_or_default();
    let owner = map.get("owner").and_then(|o| normalize_member(o, members.len()));

    json!({
        "id": id,
        "name": first_text(&map, &["name"]).unwrap_or_else(|| format!("Group #{}", id)),
        "members": members,
        "owner": owner,
        "createdAt": map.get("createdAt").and_then(Value::as_str),
        "unreadCount": map.get("unreadCount").and_then(Value::as_u64),
        "imageUrl": first_text(&map, IMAGE_ALIASES),
        "description": first_text(&map, DESCRIPTION_ALIASES),
    })
}
