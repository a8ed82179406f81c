//! ASAP server entry point
//!
//! Runs a single echo agent configured from `ASAP_*` environment variables.
//! Setting `ASAP_JWT_SECRET` turns on bearer authentication with HS256
//! tokens whose `sub` is the caller's agent URN.

use asap_core::constants::{ASAP_PATH, PAYLOAD_TASK_REQUEST};
use asap_core::{system_clock, AgentUrn, AuthScheme, Manifest, Skill};
use asap_server::{
    echo_handler, init_tracing, AsapServer, ConfigError, HandlerRegistry, JwtSecret,
    JwtValidator, ServerConfig, StartupError,
};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = ServerConfig::from_env();
    init_tracing(config.log_format)?;

    let addr = config.bind_addr()?;
    let agent = AgentUrn::for_agent(&config.agent_name).map_err(|e| ConfigError::InvalidValue {
        key: "ASAP_AGENT_NAME",
        reason: e.to_string(),
    })?;

    let mut manifest = Manifest::new(
        agent,
        config.agent_name.clone(),
        env!("CARGO_PKG_VERSION"),
        format!("http://{addr}{ASAP_PATH}"),
    )
    .with_description("Echo agent")
    .with_skill(Skill::new("echo", "Returns the task input unchanged"));

    let mut handlers = HandlerRegistry::new();
    handlers.register_blocking(PAYLOAD_TASK_REQUEST, echo_handler);

    let jwt_secret = std::env::var("ASAP_JWT_SECRET")
        .ok()
        .filter(|s| !s.is_empty());
    if jwt_secret.is_some() {
        manifest = manifest.with_auth(AuthScheme::bearer());
    }

    let mut builder = AsapServer::builder(manifest)
        .config(config)
        .handlers(handlers);
    if let Some(secret) = jwt_secret {
        builder = builder.credential_validator(JwtValidator::new(
            JwtSecret::new(secret),
            system_clock(),
        ));
    }
    let server = builder.build()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}
