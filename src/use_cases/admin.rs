use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::entities::{AdminUserRow, CurrentUser, ProfileFlag};
use crate::domain::errors::AdminError;
use crate::domain::ports::RemoteGateway;
use crate::use_cases::session::SessionManager;

/// Staff console over every account: balances and admin/owner flags.
///
/// Rows are cached in `users` after `load_users` and patched in place after
/// each confirmed mutation.
pub struct AdminConsole {
    pub gateway: Arc<dyn RemoteGateway>,
    pub session: SessionManager,
    pub users: Vec<AdminUserRow>,
}

impl AdminConsole {
    pub fn new(gateway: Arc<dyn RemoteGateway>, session: SessionManager) -> Self {
        Self {
            gateway,
            session,
            users: Vec::new(),
        }
    }

    // Acting staff member plus the token their calls run under.
    fn actor(&self) -> Result<(CurrentUser, String), AdminError> {
        let user = self
            .session
            .current_user()
            .filter(CurrentUser::is_staff)
            .ok_or(AdminError::AccessDenied)?;
        let token = self.session.access_token().ok_or(AdminError::AccessDenied)?;
        Ok((user, token))
    }

    pub async fn load_users(&mut self) -> Result<&[AdminUserRow], AdminError> {
        let (_actor, token) = self.actor()?;

        let profiles = self.gateway.list_profiles(&token).await?;
        let emails: HashMap<String, String> = match self.gateway.list_account_emails(&token).await {
            Ok(emails) => emails.into_iter().map(|e| (e.user_id, e.email)).collect(),
            Err(err) => {
                warn!(error = %err, "account emails unavailable; leaving them blank");
                HashMap::new()
            }
        };
        let balances: HashMap<String, i64> = match self.gateway.list_wallets(&token).await {
            Ok(wallets) => wallets.into_iter().map(|w| (w.user_id, w.balance)).collect(),
            Err(err) => {
                warn!(error = %err, "wallets unavailable; showing zero balances");
                HashMap::new()
            }
        };

        self.users = profiles
            .into_iter()
            .map(|profile| AdminUserRow {
                email: emails.get(&profile.id).cloned().unwrap_or_default(),
                balance: balances.get(&profile.id).copied().unwrap_or(0),
                id: profile.id,
                username: profile.username,
                is_admin: profile.is_admin,
                is_owner: profile.is_owner,
            })
            .collect();
        info!(users = self.users.len(), "admin user list loaded");
        Ok(&self.users)
    }

    #[tracing::instrument(name = "admin_add_coins", skip(self))]
    pub async fn add_coins(&mut self, user_id: &str, amount: i64) -> Result<(), AdminError> {
        let (actor, token) = self.actor()?;
        if amount == 0 {
            return Ok(());
        }
        let index = self.row_index(user_id)?;

        self.gateway.adjust_balance(&token, user_id, amount).await?;
        let row = &mut self.users[index];
        row.balance = row.balance.saturating_add(amount);
        info!(actor = %actor.id, %user_id, amount, "coins granted");

        if actor.id == user_id {
            if let Err(err) = self.session.refresh_user().await {
                warn!(error = %err, "failed to refresh own balance after grant");
            }
        }
        Ok(())
    }

    pub async fn toggle_admin(&mut self, user_id: &str) -> Result<bool, AdminError> {
        self.toggle(user_id, ProfileFlag::Admin).await
    }

    pub async fn toggle_owner(&mut self, user_id: &str) -> Result<bool, AdminError> {
        self.toggle(user_id, ProfileFlag::Owner).await
    }

    // Returns the flag's new value.
    async fn toggle(&mut self, user_id: &str, flag: ProfileFlag) -> Result<bool, AdminError> {
        let (actor, token) = self.actor()?;
        if flag == ProfileFlag::Owner && !actor.is_owner {
            return Err(AdminError::OwnerOnly);
        }
        let index = self.row_index(user_id)?;
        let value = match flag {
            ProfileFlag::Admin => !self.users[index].is_admin,
            ProfileFlag::Owner => !self.users[index].is_owner,
        };

        self.gateway
            .set_profile_flag(&token, user_id, flag, value)
            .await?;
        let row = &mut self.users[index];
        match flag {
            ProfileFlag::Admin => row.is_admin = value,
            ProfileFlag::Owner => row.is_owner = value,
        }
        info!(actor = %actor.id, %user_id, flag = flag.column(), value, "profile flag updated");
        Ok(value)
    }

    fn row_index(&self, user_id: &str) -> Result<usize, AdminError> {
        self.users
            .iter()
            .position(|row| row.id == user_id)
            .ok_or_else(|| AdminError::UnknownUser(user_id.to_string()))
    }
}
