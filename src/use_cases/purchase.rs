use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::entities::{PurchaseNotification, PurchaseReceipt, ShopItem};
use crate::domain::errors::{BalanceUpdateError, PurchaseError};
use crate::domain::ports::Notifier;
use crate::domain::redemption::generate_redemption_key;
use crate::domain::validation::validate_phone_number;
use crate::use_cases::session::SessionManager;

// Shop checkout: debit the wallet, issue a redemption key and tell the operators.
pub struct PurchaseUseCase {
    pub session: SessionManager,
    // None when no webhook is configured; notifications are then only logged.
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl PurchaseUseCase {
    #[tracing::instrument(
        name = "purchase",
        skip_all,
        fields(item_id = %item.id, price = item.price)
    )]
    pub async fn execute(
        &self,
        item: &ShopItem,
        phone_number: &str,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let phone_number = validate_phone_number(phone_number.trim())?;
        if item.price <= 0 {
            return Err(PurchaseError::InvalidPrice);
        }

        let user = self
            .session
            .current_user()
            .ok_or(PurchaseError::Balance(BalanceUpdateError::NotReady))?;
        if user.coins < item.price {
            return Err(PurchaseError::InsufficientFunds {
                balance: user.coins,
                price: item.price,
            });
        }

        self.session.update_user_coins(-item.price).await?;

        let key = generate_redemption_key(&mut OsRng);
        info!(user_id = %user.id, item_id = %item.id, "purchase completed");

        let notification = PurchaseNotification {
            item_name: item.name.clone(),
            duration: item.duration.clone(),
            price: item.price,
            phone_number,
            key: key.clone(),
        };
        self.dispatch(notification);

        Ok(PurchaseReceipt {
            item_id: item.id.clone(),
            price: item.price,
            key,
        })
    }

    // Fire-and-forget; the purchase already succeeded whatever happens here.
    fn dispatch(&self, notification: PurchaseNotification) {
        let Some(notifier) = self.notifier.clone() else {
            warn!(
                item = %notification.item_name,
                "no purchase webhook configured; notification dropped"
            );
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&notification).await {
                warn!(error = %err, item = %notification.item_name, "purchase notification failed");
            }
        });
    }
}
