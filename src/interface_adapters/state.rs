use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::domain::ports::{Clock, Notifier, RemoteGateway};
use crate::use_cases::{
    AdminConsole, LeaderboardFeed, LeaderboardUseCase, PurchaseUseCase, SessionManager,
};

// System clock adapter used outside of tests.
#[derive(Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Application context handed to every view: the session plus the use cases
/// built on top of it.
#[derive(Clone)]
pub struct ClientContext {
    pub session: SessionManager,
    pub gateway: Arc<dyn RemoteGateway>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub clock: Arc<dyn Clock>,
    pub leaderboard_refresh: Duration,
}

impl ClientContext {
    pub async fn init(&self) {
        self.session.init().await;
    }

    pub fn teardown(&self) {
        self.session.teardown();
    }

    pub fn purchases(&self) -> PurchaseUseCase {
        PurchaseUseCase {
            session: self.session.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub fn leaderboard(&self) -> LeaderboardUseCase {
        LeaderboardUseCase {
            gateway: self.gateway.clone(),
            session: self.session.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn leaderboard_feed(&self) -> LeaderboardFeed {
        LeaderboardFeed::spawn(self.leaderboard(), self.leaderboard_refresh)
    }

    pub fn admin_console(&self) -> AdminConsole {
        AdminConsole::new(self.gateway.clone(), self.session.clone())
    }
}
