// auth_probe - operator CLI for the session core.
//
// Signs in against a live deployment, resolves the role assignment and
// prints the resulting auth snapshot. Useful for verifying registry
// provisioning without opening the dashboard.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use auth_core::{
    AuthConfig, AuthContext, BaseIdentityStore, Resolver, SessionCache,
};
use auth_core::directory::PgRoleDirectory;
use auth_core::identity::HttpIdentityStore;
use auth_core::types::AuthState;

#[derive(Parser)]
#[command(name = "auth_probe", about = "Sign in and print the resolved role assignment")]
struct Args {
    /// Email to sign in with
    #[arg(long)]
    email: String,

    /// Password (prefer AUTH_PROBE_PASSWORD in the environment)
    #[arg(long)]
    password: Option<String>,

    /// Resolve only, using an already-warm cache (no sign-in)
    #[arg(long, default_value_t = false)]
    cached_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AuthConfig::from_env()?;

    let cache = Arc::new(SessionCache::open(
        config.cache_path.clone(),
        &config.deploy_domain,
        config.cache_ttl,
    ));

    if args.cached_only {
        match cache.get(&args.email) {
            Some(entry) => {
                println!(
                    "cached: role={} tenant={} cached_at={}",
                    entry.role,
                    entry.tenant_id.as_deref().unwrap_or("-"),
                    entry.cached_at
                );
            }
            None => println!("no fresh cache entry for {}", args.email),
        }
        return Ok(());
    }

    let password = match args.password {
        Some(p) => p,
        None => std::env::var("AUTH_PROBE_PASSWORD")
            .context("pass --password or set AUTH_PROBE_PASSWORD")?,
    };

    let directory = PgRoleDirectory::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect role directory: {}", e))?;
    let resolver = Arc::new(Resolver::new(
        Arc::new(directory),
        Arc::clone(&cache),
        &config,
    ));
    let store: Arc<dyn BaseIdentityStore> =
        Arc::new(HttpIdentityStore::new(&config).map_err(anyhow::Error::new)?);

    let context = AuthContext::new(store, resolver, cache, &config);
    let mut state = context.subscribe();
    context.spawn();

    context
        .sign_in(&args.email, &password)
        .await
        .map_err(|e| anyhow::anyhow!("sign-in failed: {}", e))?;

    // Wait for the context to settle (the breaker bounds this).
    loop {
        state.changed().await.ok();
        let snap = state.borrow().clone();
        if snap.state() == AuthState::Ready {
            println!(
                "email={} role={} tenant={}",
                args.email,
                snap.role.map(|r| r.to_string()).unwrap_or_default(),
                snap.tenant_id.as_deref().unwrap_or("-")
            );
            break;
        }
    }

    context.sign_out().await;
    Ok(())
}
