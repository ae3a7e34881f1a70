use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::api::{Api, register_routes};
use crate::auth::JwtValidator;
use crate::config::AppSettings;
use crate::error::Error;
use crate::middleware::CorsPolicy;
use crate::router::Router;
use crate::server::Server;
use crate::services::memory::{MemoryFinancial, MemoryUsers};
use crate::state::AppContext;
use crate::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub enum Commands {
    /// Start the web server
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Overrides `server.port`
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
        /// Forces debug-level logging
        #[arg(long, env = "DEBUG")]
        debug: bool,
    },
    /// Show version information
    Version,
}

/// Wires settings into a router with every route registered.
pub fn build_router(settings: &AppSettings) -> Result<Router, Error> {
    let tokens = Arc::new(JwtValidator::new(
        settings.auth.jwt_secret.as_bytes(),
        Duration::from_secs(settings.auth.token_ttl_secs),
    ));
    let app = AppContext::new(settings.server.drain_timeout(), tokens.clone())?;

    let cors = &settings.cors;
    let policy = CorsPolicy::new(
        &cors.allowed_origins,
        &cors.allowed_methods,
        &cors.allowed_headers,
        cors.max_age_secs.map(Duration::from_secs),
    )?;
    let mut router =
        Router::with_request_timeout(&app, settings.server.request_timeout()).with_cors(policy);

    let api = Api {
        users: Arc::new(MemoryUsers::new()),
        financial: Arc::new(MemoryFinancial::new()),
        tokens,
    };
    register_routes(&mut router, api)?;
    Ok(router)
}

/// Reads the config file and applies command-line overrides on top.
pub fn load_settings(config: &Path, port: Option<u16>, debug: bool) -> Result<AppSettings, Error> {
    let mut settings = AppSettings::new(config)?;
    if let Some(port) = port {
        settings.server.port = port;
    }
    settings.debug |= debug;
    Ok(settings)
}

async fn start(settings: &AppSettings) -> Result<()> {
    let router = build_router(settings)?;
    let server = Server::bind(settings.server.full_url()).await?;
    info!("Server is running on {}", server.local_addr());
    server.serve(router).await?;

    info!("Web server has gracefully shutdown");
    Ok(())
}

pub async fn run() -> Result<()> {
    match Commands::parse() {
        Commands::Serve { config, port, debug } => {
            let settings = load_settings(&config, port, debug)?;

            init_tracing(&settings.logger, settings.log_level());
            tracing::debug!("effective settings:\n{settings}");
            start(&settings).await
        }
        Commands::Version => {
            println!(
                "{} ({})",
                env!("CARGO_PKG_VERSION"),
                option_env!("BUILD_SHA")
                    .or(option_env!("GITHUB_SHA"))
                    .unwrap_or("dev")
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_whole_route_table() {
        let router = build_router(&AppSettings::default()).unwrap();
        let protected: Vec<_> = router
            .routes()
            .filter(|r| r.auth_required())
            .map(|r| format!("{} {}", r.method(), r.path()))
            .collect();
        assert_eq!(
            protected,
            [
                "GET /api/v1/users/profile",
                "GET /api/v1/financial/data",
                "POST /api/v1/financial/data",
                "GET /api/v1/financial/analytics",
            ]
        );
        assert_eq!(router.routes().count(), 9);
    }

    #[test]
    fn bad_cors_origin_fails_startup() {
        let mut settings = AppSettings::default();
        settings.cors.allowed_origins = vec!["bad\norigin".into()];
        assert!(matches!(build_router(&settings), Err(Error::Configuration(_))));
    }

    #[test]
    fn overrides_apply_over_file_defaults() {
        let settings = load_settings(Path::new("does-not-exist.toml"), Some(9100), true).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert!(settings.debug);
        assert_eq!(settings.server.binding, "0.0.0.0");
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Commands::try_parse_from(["fininsight", "serve", "-c", "x.toml", "--port", "9001"])
            .unwrap();
        assert!(matches!(cli, Commands::Serve { port: Some(9001), .. }));
    }
}
