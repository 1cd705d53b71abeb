//! TokenGatewayPipeline (C13): the per-request orchestration — validate the
//! inbound token, check revocation, translate claims, mint the downstream
//! token. Each stage's error kind is preserved through to `GatewayError` so
//! `auth-api` can map it to the right HTTP status without re-deriving why
//! a request failed.

use crate::config_store::ConfigStore;
use crate::error::GatewayError;
use crate::revocation::RevocationGuard;
use crate::role_catalog::SharedRoleCatalog;
use crate::translation::{ClaimTranslator, TranslationOutcome};
use auth_crypto::{TokenIssuanceParams, TokenIssuer, TokenValidator, ValidationOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct TokenGatewayPipeline {
    validator: Arc<TokenValidator>,
    revocation: Arc<RevocationGuard>,
    config_store: Arc<ConfigStore>,
    issuer: Arc<TokenIssuer>,
    issuance_params: TokenIssuanceParams,
    role_catalog: Option<SharedRoleCatalog>,
}

impl TokenGatewayPipeline {
    pub fn new(
        validator: Arc<TokenValidator>,
        revocation: Arc<RevocationGuard>,
        config_store: Arc<ConfigStore>,
        issuer: Arc<TokenIssuer>,
        issuance_params: TokenIssuanceParams,
    ) -> Self {
        Self {
            validator,
            revocation,
            config_store,
            issuer,
            issuance_params,
            role_catalog: None,
        }
    }

    /// Only needed by deployments whose translation schemas grant roles by
    /// `RoleGrant::Ref` rather than inline string key.
    pub fn with_role_catalog(mut self, role_catalog: SharedRoleCatalog) -> Self {
        self.role_catalog = Some(role_catalog);
        self
    }

    /// `config_id` selects which translation schema applies — typically
    /// the external token's issuer.
    pub async fn process(
        &self,
        bearer_token: Option<&str>,
        config_id: &str,
    ) -> Result<String, GatewayError> {
        let claims = match self.validator.validate(bearer_token).await? {
            ValidationOutcome::NoToken => return Err(GatewayError::NoToken),
            ValidationOutcome::Invalid { reason } => {
                return Err(GatewayError::InvalidToken { reason })
            }
            ValidationOutcome::Valid(claims) => claims,
        };

        let jti = claims
            .get("jti")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::InvalidToken {
                reason: "token missing jti claim".to_string(),
            })?
            .to_string();

        let issued_at = DateTime::<Utc>::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now);

        if self.revocation.is_revoked(&jti, &claims.sub, issued_at).await? {
            return Err(GatewayError::InvalidToken {
                reason: "token has been revoked".to_string(),
            });
        }

        let config_version = self.config_store.get_active(config_id).await?;
        let mut translated = match ClaimTranslator::translate(&claims, &config_version.schema) {
            TranslationOutcome::Granted(claims) => claims,
            TranslationOutcome::Denied => {
                return Err(GatewayError::InvalidToken {
                    reason: "no translation rule matched subject's claims".to_string(),
                })
            }
        };

        if !translated.role_refs.is_empty() {
            self.resolve_role_refs(&mut translated).await;
        }

        let claim_map = translated.into_claim_map();
        let token = self
            .issuer
            .issue(&claims.sub, &claim_map, &claims, &self.issuance_params)
            .await?;

        Ok(token)
    }

    /// Resolves any `RoleGrant::Ref` left unresolved by `ClaimTranslator`
    /// against the configured `RoleCatalog`, folding each found role's name
    /// and permissions into `translated`. A ref with no catalog configured,
    /// or no matching entry, is simply dropped rather than failing the
    /// request — the schema already granted whatever else matched.
    async fn resolve_role_refs(&self, translated: &mut crate::models::TranslatedClaims) {
        let Some(catalog) = &self.role_catalog else {
            translated.role_refs.clear();
            return;
        };
        for role_id in translated.role_refs.drain(..).collect::<Vec<_>>() {
            if let Some(role) = catalog.resolve(role_id).await {
                translated.roles.push(role.name);
                translated.permissions.extend(role.permissions);
            }
        }
        translated.roles.sort();
        translated.roles.dedup();
        translated.permissions.sort();
        translated.permissions.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom_front::BloomFront;
    use crate::config_store::InMemoryConfigStoreBackend;
    use crate::models::{
        ClaimSource, ClaimSourceType, RoleGrant, RoleMappings, TranslationConfigSchema,
        TranslationDefaults,
    };
    use crate::revocation_bus::InMemoryRevocationBus;
    use crate::revocation_store::InMemoryRevocationStore;
    use auth_cache::MultiLevelCache;
    use auth_crypto::{
        HttpJwksFetcher, InMemoryKeyStore, JwksCache, KeyStatus, KeyStore, SigningKeyRecord,
    };
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn group_source() -> ClaimSource {
        ClaimSource {
            name: "group".to_string(),
            claim_path: "group".to_string(),
            source_type: ClaimSourceType::Single,
        }
    }

    fn engineers_schema() -> TranslationConfigSchema {
        let mut role_to_permissions = HashMap::new();
        role_to_permissions.insert(
            "engineers".to_string(),
            RoleGrant::Permissions(vec!["read:code".to_string()]),
        );
        TranslationConfigSchema {
            version: 1,
            sources: vec![group_source()],
            transforms: vec![],
            mappings: RoleMappings {
                role_to_permissions,
                direct_permissions: HashMap::new(),
            },
            defaults: TranslationDefaults {
                deny_if_no_match: true,
                include_unmapped: false,
            },
        }
    }

    fn schema_with_role_grant(claim_value: &str, grant: RoleGrant) -> TranslationConfigSchema {
        let mut role_to_permissions = HashMap::new();
        role_to_permissions.insert(claim_value.to_string(), grant);
        TranslationConfigSchema {
            version: 1,
            sources: vec![group_source()],
            transforms: vec![],
            mappings: RoleMappings {
                role_to_permissions,
                direct_permissions: HashMap::new(),
            },
            defaults: TranslationDefaults {
                deny_if_no_match: true,
                include_unmapped: false,
            },
        }
    }

    async fn idp_key_pair() -> (String, String) {
        auth_crypto::generate_rsa_keypair_pem().unwrap()
    }

    struct StaticFetcher {
        document: auth_crypto::JwksDocument,
    }

    #[async_trait::async_trait]
    impl auth_crypto::JwksFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<auth_crypto::JwksDocument, auth_crypto::JwksCacheError> {
            Ok(self.document.clone())
        }
    }

    async fn build_pipeline_with_idp_key() -> (TokenGatewayPipeline, String, String) {
        let (idp_private_pem, idp_public_pem) = idp_key_pair().await;
        let idp_kid = "idp-key-1".to_string();
        let jwk = auth_crypto::jwks::jwk_from_public_key_pem(&idp_kid, &idp_public_pem).unwrap();

        let jwks_cache = Arc::new(JwksCache::new(
            Arc::new(StaticFetcher {
                document: auth_crypto::JwksDocument { keys: vec![jwk] },
            }),
            "https://idp.example/jwks".to_string(),
            Duration::from_secs(300),
            Duration::from_secs(300),
        ));
        let validator = Arc::new(TokenValidator::new(jwks_cache, None, 30));

        let revocation = Arc::new(RevocationGuard::new(
            Arc::new(InMemoryRevocationStore::new()),
            Arc::new(BloomFront::new(1000, 0.01)),
            Arc::new(InMemoryRevocationBus::default()),
            Duration::from_millis(100),
            true,
            chrono::Duration::hours(1),
        ));

        let config_store = Arc::new(ConfigStore::new(
            MultiLevelCache::l1_only(100),
            Duration::from_secs(300),
            Arc::new(InMemoryConfigStoreBackend::new()),
        ));
        config_store
            .publish("https://idp.example", engineers_schema())
            .await
            .unwrap();

        let key_store: auth_crypto::SharedKeyStore = Arc::new(InMemoryKeyStore::new());
        let (gw_priv, gw_pub) = auth_crypto::generate_rsa_keypair_pem().unwrap();
        let mut gw_key = SigningKeyRecord::new_pending("gw-key-1".to_string(), gw_priv, gw_pub);
        gw_key.status = KeyStatus::Active;
        key_store.create(gw_key).await.unwrap();
        let issuer = Arc::new(TokenIssuer::new(key_store));

        let issuance_params = TokenIssuanceParams {
            issuer: "https://gateway.internal".to_string(),
            audience: None,
            ttl_secs: 600,
            forwarded_claims: vec!["roles".to_string(), "permissions".to_string()],
            key_id_fallback: None,
        };

        let pipeline = TokenGatewayPipeline::new(validator, revocation, config_store, issuer, issuance_params);

        let external_token = mint_external_token(&idp_private_pem, &idp_kid);
        (pipeline, external_token, idp_kid)
    }

    fn mint_external_token(private_pem: &str, kid: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = json!({
            "sub": "user-1",
            "iss": "https://idp.example",
            "iat": now,
            "nbf": now,
            "exp": now + 3600,
            "jti": "ext-jti-1",
            "group": "engineers",
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
        encode(&header, &claims, &encoding_key).unwrap()
    }

    #[tokio::test]
    async fn happy_path_issues_a_downstream_token() {
        let (pipeline, external_token, _) = build_pipeline_with_idp_key().await;
        let result = pipeline
            .process(Some(&external_token), "https://idp.example")
            .await;
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[tokio::test]
    async fn missing_bearer_token_is_no_token() {
        let (pipeline, _, _) = build_pipeline_with_idp_key().await;
        let result = pipeline.process(None, "https://idp.example").await;
        assert!(matches!(result, Err(GatewayError::NoToken)));
    }

    #[tokio::test]
    async fn revoked_jti_is_rejected() {
        let (pipeline, external_token, _) = build_pipeline_with_idp_key().await;
        pipeline.revocation.revoke_token("ext-jti-1", None, None).await.unwrap();
        let result = pipeline
            .process(Some(&external_token), "https://idp.example")
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidToken { .. })));
    }

    #[tokio::test]
    async fn no_matching_translation_rule_is_rejected() {
        let (pipeline, external_token, _) = build_pipeline_with_idp_key().await;

        // Republish a schema whose mapping only knows about a group the
        // token's claims don't carry ("engineers" from mint_external_token)
        // — deny_if_no_match rejects the request.
        pipeline
            .config_store
            .publish(
                "https://idp.example",
                schema_with_role_grant(
                    "finance",
                    RoleGrant::Permissions(vec!["read:ledger".to_string()]),
                ),
            )
            .await
            .unwrap();

        let result = pipeline
            .process(Some(&external_token), "https://idp.example")
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidToken { .. })));
    }

    #[tokio::test]
    async fn role_ref_grant_resolves_against_catalog() {
        use crate::role_catalog::InMemoryRoleCatalog;
        use std::collections::HashMap;

        let (pipeline, external_token, _) = build_pipeline_with_idp_key().await;

        let role_id = uuid::Uuid::new_v4();
        let mut roles = HashMap::new();
        roles.insert(
            role_id,
            crate::models::Role {
                id: role_id,
                name: "platform-admin".to_string(),
                permissions: vec!["admin:*".to_string()],
            },
        );
        let pipeline = pipeline.with_role_catalog(Arc::new(InMemoryRoleCatalog::new(roles)));

        pipeline
            .config_store
            .publish(
                "https://idp.example",
                schema_with_role_grant("engineers", RoleGrant::Ref(role_id)),
            )
            .await
            .unwrap();

        let result = pipeline
            .process(Some(&external_token), "https://idp.example")
            .await;
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[tokio::test]
    async fn unresolvable_role_ref_without_catalog_is_dropped_not_fatal() {
        let (pipeline, external_token, _) = build_pipeline_with_idp_key().await;

        pipeline
            .config_store
            .publish(
                "https://idp.example",
                schema_with_role_grant("engineers", RoleGrant::Ref(uuid::Uuid::new_v4())),
            )
            .await
            .unwrap();

        let result = pipeline
            .process(Some(&external_token), "https://idp.example")
            .await;
        assert!(result.is_ok(), "{:?}", result.err());
    }
}
