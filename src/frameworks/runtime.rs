// Framework bootstrap for the headless client runtime.

use std::sync::Arc;

use crate::domain::errors::GatewayError;
use crate::domain::ports::{Clock, Notifier, RealtimeSource, RemoteGateway, SessionStore};
use crate::frameworks::config::{self, ClientConfig};
use crate::interface_adapters::clients::{HttpGateway, RealtimeClient, WebhookNotifier};
use crate::interface_adapters::session_store::{FileSessionStore, InMemorySessionStore};
use crate::interface_adapters::state::{ClientContext, SystemClock};
use crate::use_cases::{SessionDeps, SessionManager, SessionSettings};

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

// Wire adapters into a context; nothing touches the network until init.
pub fn build_context(config: &ClientConfig) -> Result<ClientContext, GatewayError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::new(
        &config.gateway_url,
        config.anon_key.clone(),
        config.request_timeout,
        clock.clone(),
    )?);
    let store: Arc<dyn SessionStore> = match &config.session_file {
        Some(path) => Arc::new(FileSessionStore::new(path.clone())),
        None => Arc::new(InMemorySessionStore::default()),
    };
    let realtime: Option<Arc<dyn RealtimeSource>> = if config.realtime {
        Some(Arc::new(RealtimeClient::new(
            &config.gateway_url,
            &config.anon_key,
        )?))
    } else {
        None
    };
    let notifier: Option<Arc<dyn Notifier>> = match &config.webhook_url {
        Some(url) => Some(Arc::new(WebhookNotifier::new(
            url.clone(),
            config.request_timeout,
        )?)),
        None => None,
    };

    let session = SessionManager::new(
        SessionDeps {
            gateway: gateway.clone(),
            store,
            clock: clock.clone(),
            realtime,
        },
        SessionSettings {
            presence_interval: config.presence_interval,
            refresh_margin: config::SESSION_REFRESH_MARGIN,
            refresh_retry: config::SESSION_REFRESH_RETRY,
            realtime_retry: config::REALTIME_RETRY,
        },
    );

    Ok(ClientContext {
        session,
        gateway,
        notifier,
        clock,
        leaderboard_refresh: config.leaderboard_refresh,
    })
}

pub async fn run() -> std::io::Result<()> {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ClientConfig::from_env().map_err(|err| {
        tracing::error!(error = %err, "invalid configuration");
        std::io::Error::other(err)
    })?;
    let context = build_context(&config).map_err(|err| {
        tracing::error!(error = %err, "failed to build client context");
        std::io::Error::other(err)
    })?;

    context.init().await;
    if context.session.current_user().is_none() && context.session.access_token().is_none() {
        if let Some(credentials) = &config.credentials {
            if let Err(err) = context
                .session
                .login(&credentials.email, &credentials.password)
                .await
            {
                tracing::warn!(error = %err, notice = err.user_message(), "startup login failed");
            }
        }
    }

    let feed = context.leaderboard_feed();
    let mut session_rx = context.session.subscribe();
    tracing::info!(gateway = %config.gateway_url, "client running; ctrl-c to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::error!(error = %err, "failed to listen for shutdown signal");
                }
                break;
            }
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = session_rx.borrow_and_update().clone();
                match snapshot.user {
                    Some(user) => tracing::info!(
                        user_id = %user.id,
                        username = %user.username,
                        coins = user.coins,
                        "session updated"
                    ),
                    None => tracing::info!(state = ?snapshot.state, "session state changed"),
                }
            }
        }
    }

    drop(feed);
    context.teardown();
    tracing::info!("client stopped");
    Ok(())
}
