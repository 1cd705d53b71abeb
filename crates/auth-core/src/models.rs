//! Shared data model for claim translation, revocation, and PKCE state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where a claim's raw value lives in the external token and how to read it.
///
/// `claim_path` is dot-notated (`"realm_access.roles"`) so claims nested
/// under an IdP-specific wrapper object are reachable without a bespoke
/// extractor per issuer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimSourceType {
    /// A JSON array; each element becomes one value.
    Array,
    /// A single string split on whitespace.
    SpaceDelimited,
    /// A single string split on commas.
    CommaDelimited,
    /// Any scalar, stringified, becomes exactly one value.
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimSource {
    pub name: String,
    pub claim_path: String,
    #[serde(rename = "type")]
    pub source_type: ClaimSourceType,
}

/// One step in a `ClaimTransform`'s pipeline, applied in declaration order to
/// every value extracted for the transform's `source`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransformOp {
    /// Removes `prefix` from the front of a value; leaves values that don't
    /// start with it untouched.
    StripPrefix { prefix: String },
    /// Literal substring replacement, not a regex.
    Replace { from: String, to: String },
    Lowercase,
    Uppercase,
    /// PCRE-compatible `pattern`, replacing every match with `replacement`
    /// (which may reference capture groups as `$1`, `$2`, ...).
    Regex { pattern: String, replacement: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimTransform {
    /// Name of the `ClaimSource` this transform's operations apply to.
    pub source: String,
    pub operations: Vec<TransformOp>,
}

/// The value side of `RoleMappings::role_to_permissions`: either an inline
/// permission list (the common case) or a reference into the `Role` table,
/// resolved against a `RoleCatalog` at pipeline time. `Ref` is tried first on
/// deserialize, so a value only parses as a reference when it's actually
/// UUID-shaped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RoleGrant {
    Ref(Uuid),
    Permissions(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoleMappings {
    /// Claim value -> role (and the permissions it carries).
    #[serde(default)]
    pub role_to_permissions: HashMap<String, RoleGrant>,
    /// Claim value -> a single permission granted directly, with no
    /// intervening role.
    #[serde(default)]
    pub direct_permissions: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationDefaults {
    /// No value extracted from any source matched `mappings` -> reject the
    /// request. The secure default; also what an absent `defaults` block
    /// means.
    #[serde(default = "default_deny_if_no_match")]
    pub deny_if_no_match: bool,
    /// A value that matched neither `role_to_permissions` nor
    /// `direct_permissions` is still granted as a role, under its own name.
    #[serde(default)]
    pub include_unmapped: bool,
}

fn default_deny_if_no_match() -> bool {
    true
}

impl Default for TranslationDefaults {
    fn default() -> Self {
        Self {
            deny_if_no_match: true,
            include_unmapped: false,
        }
    }
}

fn default_schema_version() -> u64 {
    1
}

/// The schema an operator authors: how to extract, transform, and map an
/// external IdP's claims onto the gateway's internal role/permission
/// vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationConfigSchema {
    #[serde(default = "default_schema_version")]
    pub version: u64,
    #[serde(default)]
    pub sources: Vec<ClaimSource>,
    #[serde(default)]
    pub transforms: Vec<ClaimTransform>,
    #[serde(default)]
    pub mappings: RoleMappings,
    #[serde(default)]
    pub defaults: TranslationDefaults,
}

impl Default for TranslationConfigSchema {
    fn default() -> Self {
        Self {
            version: 1,
            sources: Vec::new(),
            transforms: Vec::new(),
            mappings: RoleMappings::default(),
            defaults: TranslationDefaults::default(),
        }
    }
}

/// One persisted revision of a schema for a given config id (an external
/// issuer, or a named service binding). `ConfigStore` tracks which version
/// is active independently of how many historical versions exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfigVersion {
    pub config_id: String,
    pub version: u64,
    pub schema: TranslationConfigSchema,
    pub created_at: DateTime<Utc>,
}

/// Output of `ClaimTranslator`: the internal vocabulary `TokenIssuer`
/// forwards into the downstream token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TranslatedClaims {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// `RoleGrant::Ref` entries not yet resolved against a `RoleCatalog`.
    /// Empty whenever a schema only ever grants roles by literal permission
    /// list.
    #[serde(default)]
    pub role_refs: Vec<Uuid>,
    /// Every source's post-transform value set, keyed by source name.
    /// Present regardless of whether a value ended up mapped to a role or
    /// permission, so a downstream consumer can see what was extracted even
    /// for claims the mapping table doesn't know about.
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl TranslatedClaims {
    pub fn into_claim_map(self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert(
            "roles".to_string(),
            serde_json::Value::Array(self.roles.into_iter().map(serde_json::Value::String).collect()),
        );
        map.insert(
            "permissions".to_string(),
            serde_json::Value::Array(
                self.permissions
                    .into_iter()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        );
        let attributes = self
            .attributes
            .into_iter()
            .map(|(name, values)| {
                (
                    name,
                    serde_json::Value::Array(values.into_iter().map(serde_json::Value::String).collect()),
                )
            })
            .collect();
        map.insert("attributes".to_string(), serde_json::Value::Object(attributes));
        map
    }
}

/// A role record, only consulted when a schema references a role by id
/// rather than by inline permission list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub role_ids: Vec<Uuid>,
}

/// What a caller asks the revocation subsystem about a given token.
#[derive(Debug, Clone)]
pub struct RevocationQuery {
    pub jti: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RevocationScope {
    Token {
        jti: String,
    },
    /// Revokes every token for `subject` issued before `issued_before`, so a
    /// token minted after a credential reset stays valid.
    User {
        subject: String,
        issued_before: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub scope: RevocationScope,
    pub revoked_at: DateTime<Utc>,
    /// Entry is no longer consulted once `now >= expires_at`. Writing an
    /// entry with `expires_at <= now` is a no-op.
    pub expires_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub type RoleTable = HashMap<Uuid, Role>;
