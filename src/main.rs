//! Entry point for the identity-aware gateway.

use anyhow::Result;
use auth_api::AppState;
use auth_cache::MultiLevelCache;
use auth_config::{ConfigLoader, ConfigManager};
use auth_core::config_store::ConfigStore;
use auth_core::pipeline::TokenGatewayPipeline;
use auth_core::revocation::RevocationGuard;
use auth_core::revocation_bus::InMemoryRevocationBus;
use auth_crypto::{
    HttpJwksFetcher, JwksCache, JwksPublisher, KeyLifecycleManager, KeyRotationPolicy,
    SharedKeyStore, TokenIssuanceParams, TokenIssuer, TokenValidator,
};
use auth_db::{create_mysql_pool, MySqlConfigStoreBackend, MySqlKeyStore, MySqlPkceStore, MySqlRevocationStore};
use auth_platform::{shutdown_signal, PortAuthority, PortClass, PortPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_core=debug,auth_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting identity-aware gateway");

    let environment =
        std::env::var("AUTH__ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    let config_loader = ConfigLoader::new("config", &environment);
    let config_manager = ConfigManager::new(config_loader)?;
    let config = config_manager.get_config();
    info!(environment = %environment, "configuration loaded");

    let pool = create_mysql_pool(&config.database).await?;
    info!("database connection established");

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        match e {
            sqlx::migrate::MigrateError::Dirty(version) => {
                info!(version, "migrations already applied (dirty), continuing");
            }
            sqlx::migrate::MigrateError::VersionMissing(_) => {
                info!("migrations already applied, continuing");
            }
            other => return Err(other.into()),
        }
    } else {
        info!("migrations applied");
    }

    // C1/C2: signing keys + their lifecycle. Reconcile before anything else
    // can accept traffic, so the gateway never serves with zero ACTIVE keys.
    let key_store: SharedKeyStore = Arc::new(MySqlKeyStore::new(pool.clone()));
    let rotation_policy = KeyRotationPolicy {
        pending_grace_secs: config.key_rotation.pending_grace_secs as i64,
        retention_secs: config.key_rotation.retention_secs as i64,
        archive_ttl_secs: config.key_rotation.archive_ttl_secs as i64,
        max_rotation_attempts: config.key_rotation.max_rotation_attempts,
    };
    let lifecycle = KeyLifecycleManager::new(key_store.clone(), rotation_policy);
    lifecycle.reconcile().await?;
    info!("signing key lifecycle reconciled");

    if config.key_rotation.enabled {
        let lifecycle = Arc::new(lifecycle);
        let interval = Duration::from_secs(config.key_rotation.rotation_interval_secs);
        let rotating = lifecycle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = rotating.rotate().await {
                    tracing::warn!(error = %e, "scheduled key rotation failed");
                }
            }
        });
    }

    // C3/C4: publish the gateway's own keys, cache the external IdP's.
    let jwks_publisher = Arc::new(JwksPublisher::new(key_store.clone()));
    let jwks_cache = Arc::new(JwksCache::new(
        Arc::new(HttpJwksFetcher::default()),
        config.jwks_cache.external_jwks_url.clone(),
        Duration::from_secs(config.jwks_cache.refresh_interval_secs),
        Duration::from_secs(config.jwks_cache.stale_while_error_secs),
    ));

    // C5: inbound token validation against the external IdP's JWKS.
    let validator = Arc::new(TokenValidator::new(
        jwks_cache,
        config.jwks_cache.expected_issuer.clone(),
        config.jwks_cache.skew_tolerance_secs,
    ));

    // C9/C10/C11: revocation store, Bloom front-door, event bus.
    let revocation_default_ttl = chrono::Duration::seconds(
        (config.token_issuance.token_ttl_secs as i64).max(86_400) * 2,
    );
    let revocation_store = Arc::new(MySqlRevocationStore::new(pool.clone()));
    let bloom = Arc::new(auth_core::bloom_front::BloomFront::new(
        config.revocation.bloom_capacity,
        config.revocation.bloom_fp_rate,
    ));
    bloom.rebuild(revocation_store.as_ref()).await?;
    let revocation_bus = Arc::new(InMemoryRevocationBus::default());
    let revocation = Arc::new(RevocationGuard::new(
        revocation_store.clone(),
        bloom.clone(),
        revocation_bus,
        Duration::from_millis(config.revocation.query_timeout_ms),
        config.revocation.check_user_revocation,
        revocation_default_ttl,
    ));

    if config.revocation.enabled {
        let rebuild_interval = Duration::from_secs(config.revocation.rebuild_interval_secs);
        let revocation_for_rebuild = revocation.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rebuild_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = revocation_for_rebuild.rebuild_bloom().await {
                    tracing::warn!(error = %e, "scheduled bloom rebuild failed");
                }
            }
        });
    }

    // C7: tiered translation-config store.
    let redis_url = config.external_services.redis.as_ref().map(|r| r.url.clone());
    let l1_l2 = match (&redis_url, config.translation.l2_enabled) {
        (Some(url), true) => MultiLevelCache::new(url)?,
        _ => MultiLevelCache::l1_only(config.translation.l1_max_size),
    };
    let config_store = Arc::new(ConfigStore::new(
        l1_l2,
        Duration::from_secs(config.translation.l1_ttl_secs),
        Arc::new(MySqlConfigStoreBackend::new(pool.clone())),
    ));

    // C8: downstream token issuance.
    let issuer = Arc::new(TokenIssuer::new(key_store.clone()));
    let issuance_params = TokenIssuanceParams {
        issuer: config.token_issuance.issuer.clone(),
        audience: config.token_issuance.audience.clone(),
        ttl_secs: config.token_issuance.token_ttl_secs,
        forwarded_claims: config.token_issuance.forwarded_claims.clone(),
        key_id_fallback: config.token_issuance.key_id_fallback.clone(),
    };

    // C13: the per-request pipeline tying everything above together.
    let pipeline = Arc::new(TokenGatewayPipeline::new(
        validator,
        revocation.clone(),
        config_store,
        issuer,
        issuance_params,
    ));

    // C12: PKCE, not yet wired into any HTTP route beyond storage —
    // authorization-code issuance is the external IdP's concern, not this
    // gateway's (spec.md Non-goals: no rewrite of the IdP).
    let _pkce_store = Arc::new(MySqlPkceStore::new(pool.clone()));

    let app_state = AppState {
        pipeline,
        revocation,
        jwks_publisher,
        jwks_public_ttl: Duration::from_secs(config.jwks_cache.jwks_public_ttl_secs),
    };

    let app = auth_api::app(app_state);

    let port_authority = PortAuthority::new()?;
    let port_policy = PortPolicy::new(config.server.port, PortClass::Public, "http")
        .with_fallback_range((config.server.port + 1)..=(config.server.port + 9));
    let managed_listener = port_authority.acquire(&port_policy, &config.server.host).await?;
    let bound_port = managed_listener.port();

    let display_host = if config.server.host == "0.0.0.0" {
        "localhost"
    } else {
        &config.server.host
    };

    info!(
        host = display_host,
        port = bound_port,
        pid = std::process::id(),
        "gateway ready"
    );

    let listener = managed_listener.into_tokio_listener()?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining connections");
            if let Err(e) = port_authority.release(bound_port).await {
                tracing::warn!(error = %e, "failed to release port lease");
            }
            info!("graceful shutdown complete");
        }
    }

    Ok(())
}
