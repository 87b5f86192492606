// Domain layer: session, wallet and shop types plus the gateway ports.

pub mod entities;
pub mod errors;
pub mod period;
pub mod ports;
pub mod redemption;
pub mod validation;

pub use entities::{
    AccountEmail, AdminUserRow, AuthEvent, AuthState, ChangeKind, CurrentUser, Identity,
    LeaderboardEntry, LeaderboardPeriod, LeaderboardRecord, PresenceRecord, PresenceStatus,
    ProfileFlag, ProfileSummary, PurchaseNotification, PurchaseReceipt, RealtimeEvent, Session,
    ShopItem, Wallet,
};
pub use errors::{
    AdminError, AuthError, BalanceUpdateError, DataFetchError, GatewayError, PresenceError,
    PurchaseError,
};
pub use ports::{
    AuthGateway, Clock, DataGateway, Notifier, RealtimeSource, RemoteGateway, SessionStore,
};
