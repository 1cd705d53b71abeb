//! Translates external IdP claims into the gateway's internal
//! role/permission vocabulary (C6). A pure function of (claims, schema):
//! same inputs always produce the same `TranslationOutcome`. The algorithm
//! is a three-stage pipeline — extract each declared source from the raw
//! claim set, apply that source's transforms in order, then map the union
//! of every transformed value onto roles and permissions.

use crate::models::{
    ClaimSource, ClaimSourceType, ClaimTransform, RoleGrant, TransformOp, TranslatedClaims,
    TranslationConfigSchema,
};
use auth_crypto::ExternalClaims;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Granted(TranslatedClaims),
    /// No value extracted from any source matched the mapping table and the
    /// schema has no defaults — or `deny_if_no_match` is set, which is the
    /// secure default absent an explicit `defaults` block.
    Denied,
}

pub struct ClaimTranslator;

impl ClaimTranslator {
    pub fn translate(claims: &ExternalClaims, schema: &TranslationConfigSchema) -> TranslationOutcome {
        let extracted = extract(claims, &schema.sources);
        let attributes = transform(extracted, &schema.transforms);

        let mut all_values: Vec<&str> = attributes
            .values()
            .flat_map(|values| values.iter().map(String::as_str))
            .collect();
        all_values.sort_unstable();
        all_values.dedup();

        let mut roles: Vec<String> = Vec::new();
        let mut role_refs: Vec<uuid::Uuid> = Vec::new();
        let mut permissions: Vec<String> = Vec::new();

        for value in all_values {
            let role_grant = schema.mappings.role_to_permissions.get(value);
            let direct_permission = schema.mappings.direct_permissions.get(value);

            if let Some(grant) = role_grant {
                match grant {
                    RoleGrant::Ref(id) => role_refs.push(*id),
                    RoleGrant::Permissions(perms) => {
                        roles.push(value.to_string());
                        permissions.extend(perms.iter().cloned());
                    }
                }
            }
            if let Some(permission) = direct_permission {
                permissions.push(permission.clone());
            }
            if role_grant.is_none() && direct_permission.is_none() && schema.defaults.include_unmapped {
                roles.push(value.to_string());
            }
        }

        let granted_something = !roles.is_empty() || !permissions.is_empty() || !role_refs.is_empty();
        if !granted_something && schema.defaults.deny_if_no_match {
            return TranslationOutcome::Denied;
        }

        dedup(&mut roles);
        dedup(&mut permissions);
        role_refs.sort();
        role_refs.dedup();

        TranslationOutcome::Granted(TranslatedClaims {
            roles,
            permissions,
            role_refs,
            attributes,
        })
    }
}

/// Resolves each source's `claim_path` (dot-notated) against the raw claim
/// object and parses the result into a set of string values per its
/// declared `type`. A source whose path isn't present in the claims is
/// simply absent from the result, not an error.
fn extract(claims: &ExternalClaims, sources: &[ClaimSource]) -> HashMap<String, Vec<String>> {
    let root = Value::Object(claims.raw.clone());
    let mut out = HashMap::new();
    for source in sources {
        let Some(value) = resolve_path(&root, &source.claim_path) else {
            continue;
        };
        let values = match source.source_type {
            ClaimSourceType::Array => match value {
                Value::Array(items) => items.iter().map(value_to_string).collect(),
                other => vec![value_to_string(other)],
            },
            ClaimSourceType::SpaceDelimited => split_nonempty(&value_to_string(value), ' '),
            ClaimSourceType::CommaDelimited => split_nonempty(&value_to_string(value), ','),
            ClaimSourceType::Single => vec![value_to_string(value)],
        };
        out.insert(source.name.clone(), values);
    }
    out
}

fn split_nonempty(s: &str, sep: char) -> Vec<String> {
    s.split(sep)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_path<'a>(root: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in dotted_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Applies each transform's operations in order to every value of its
/// `source`. Sources with no matching transform pass through untouched.
fn transform(
    mut extracted: HashMap<String, Vec<String>>,
    transforms: &[ClaimTransform],
) -> HashMap<String, Vec<String>> {
    for claim_transform in transforms {
        let Some(values) = extracted.get_mut(&claim_transform.source) else {
            continue;
        };
        for value in values.iter_mut() {
            for op in &claim_transform.operations {
                apply_op(value, op);
            }
        }
    }
    extracted
}

fn apply_op(value: &mut String, op: &TransformOp) {
    match op {
        TransformOp::StripPrefix { prefix } => {
            if let Some(stripped) = value.strip_prefix(prefix.as_str()) {
                *value = stripped.to_string();
            }
        }
        TransformOp::Replace { from, to } => {
            *value = value.replace(from.as_str(), to.as_str());
        }
        TransformOp::Lowercase => *value = value.to_lowercase(),
        TransformOp::Uppercase => *value = value.to_uppercase(),
        TransformOp::Regex { pattern, replacement } => {
            if let Ok(re) = regex::Regex::new(pattern) {
                *value = re.replace_all(value, replacement.as_str()).into_owned();
            }
        }
    }
}

fn dedup(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
    values.sort();
}
