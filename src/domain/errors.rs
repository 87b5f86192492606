use std::fmt;

// Failures reported by any gateway adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Transport(String),
    Upstream { status: u16, message: Option<String> },
    Decode(String),
    // Account created but the gateway withholds a session until the email is confirmed.
    ConfirmationRequired,
}

impl GatewayError {
    pub fn message(&self) -> Option<&str> {
        match self {
            GatewayError::Upstream { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(err) => write!(f, "gateway transport error: {err}"),
            GatewayError::Upstream { status, message } => {
                if let Some(message) = message {
                    write!(f, "gateway upstream error {status}: {message}")
                } else {
                    write!(f, "gateway upstream error {status}")
                }
            }
            GatewayError::Decode(err) => write!(f, "gateway response decode error: {err}"),
            GatewayError::ConfirmationRequired => write!(f, "email confirmation required"),
        }
    }
}

impl std::error::Error for GatewayError {}

// Login and signup failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidEmail,
    InvalidPassword,
    InvalidUsername,
    InProgress,
    // A logout landed while the attempt was in flight.
    Cancelled,
    ConfirmationRequired,
    Rejected(String),
    Unavailable(String),
}

impl AuthError {
    pub fn from_gateway(err: GatewayError) -> Self {
        match err {
            GatewayError::Upstream { status, message } if (400..500).contains(&status) => {
                AuthError::Rejected(message.unwrap_or_else(|| "invalid credentials".to_string()))
            }
            GatewayError::ConfirmationRequired => AuthError::ConfirmationRequired,
            other => AuthError::Unavailable(other.to_string()),
        }
    }

    // Generic notice shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "Please enter a valid email",
            AuthError::InvalidPassword => "Password must be at least 6 characters",
            AuthError::InvalidUsername => "Username must be at least 3 characters",
            AuthError::InProgress => "Sign-in already in progress",
            AuthError::Cancelled => "Sign-in was cancelled",
            AuthError::ConfirmationRequired => "Check your inbox to confirm your email",
            AuthError::Rejected(_) | AuthError::Unavailable(_) => {
                "Please check your credentials and try again."
            }
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidEmail => write!(f, "invalid email"),
            AuthError::InvalidPassword => write!(f, "password must be at least 6 characters"),
            AuthError::InvalidUsername => write!(f, "username must be at least 3 characters"),
            AuthError::InProgress => write!(f, "authentication already in progress"),
            AuthError::Cancelled => write!(f, "authentication cancelled by logout"),
            AuthError::ConfirmationRequired => write!(f, "email confirmation required"),
            AuthError::Rejected(message) => write!(f, "authentication rejected: {message}"),
            AuthError::Unavailable(message) => write!(f, "authentication unavailable: {message}"),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceUpdateError {
    // No authenticated identity to apply the change to yet.
    NotReady,
    Rejected(String),
}

impl BalanceUpdateError {
    pub fn user_message(&self) -> &'static str {
        "An error occurred while updating your balance. Please try again later."
    }
}

impl fmt::Display for BalanceUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceUpdateError::NotReady => write!(f, "no authenticated user to update"),
            BalanceUpdateError::Rejected(message) => {
                write!(f, "balance update rejected: {message}")
            }
        }
    }
}

impl std::error::Error for BalanceUpdateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFetchError {
    NotAuthenticated,
    NotFound { table: &'static str },
    Gateway(GatewayError),
}

impl DataFetchError {
    pub fn user_message(&self) -> &'static str {
        "Failed to load data. Please try again later."
    }
}

impl fmt::Display for DataFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFetchError::NotAuthenticated => write!(f, "no active session"),
            DataFetchError::NotFound { table } => write!(f, "no {table} record found"),
            DataFetchError::Gateway(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DataFetchError {}

impl From<GatewayError> for DataFetchError {
    fn from(err: GatewayError) -> Self {
        DataFetchError::Gateway(err)
    }
}

// Heartbeat failures; logged, never surfaced to views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    NotAuthenticated,
    Gateway(GatewayError),
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceError::NotAuthenticated => write!(f, "no active session"),
            PresenceError::Gateway(err) => write!(f, "presence update failed: {err}"),
        }
    }
}

impl std::error::Error for PresenceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    InvalidPhoneNumber,
    InsufficientFunds { balance: i64, price: i64 },
    InvalidPrice,
    Balance(BalanceUpdateError),
}

impl PurchaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PurchaseError::InvalidPhoneNumber => "Please enter a valid phone number",
            PurchaseError::InsufficientFunds { .. } => "Not enough coins for this item",
            PurchaseError::InvalidPrice | PurchaseError::Balance(_) => {
                "An error occurred while processing your purchase"
            }
        }
    }
}

impl fmt::Display for PurchaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseError::InvalidPhoneNumber => write!(f, "invalid phone number"),
            PurchaseError::InsufficientFunds { balance, price } => {
                write!(f, "insufficient funds: balance {balance}, price {price}")
            }
            PurchaseError::InvalidPrice => write!(f, "item price must be positive"),
            PurchaseError::Balance(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PurchaseError {}

impl From<BalanceUpdateError> for PurchaseError {
    fn from(err: BalanceUpdateError) -> Self {
        PurchaseError::Balance(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    AccessDenied,
    OwnerOnly,
    UnknownUser(String),
    Gateway(GatewayError),
}

impl AdminError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AdminError::AccessDenied => "You don't have permission to access the admin panel",
            AdminError::OwnerOnly => "Only owners can change owner status",
            AdminError::UnknownUser(_) | AdminError::Gateway(_) => {
                "Failed to update user. Please try again later."
            }
        }
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::AccessDenied => write!(f, "admin access denied"),
            AdminError::OwnerOnly => write!(f, "only owners can change owner status"),
            AdminError::UnknownUser(id) => write!(f, "unknown user {id}"),
            AdminError::Gateway(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AdminError {}

impl From<GatewayError> for AdminError {
    fn from(err: GatewayError) -> Self {
        AdminError::Gateway(err)
    }
}
