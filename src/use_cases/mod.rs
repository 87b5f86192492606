pub mod admin;
pub mod leaderboard;
pub mod purchase;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use admin::AdminConsole;
pub use leaderboard::{
    LEADERBOARD_LIMIT, LeaderboardFeed, LeaderboardUseCase, LeaderboardView, user_rank,
};
pub use purchase::PurchaseUseCase;
pub use session::{SessionDeps, SessionManager, SessionSettings, SessionSnapshot};
