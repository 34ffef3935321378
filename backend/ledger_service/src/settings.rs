//! Platform settings: the deposit channels users are told to pay into.
//!
//! Stored as one JSON value under the `deposit_accounts` key.

use ledger_core::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::storage_error;
use crate::platform::Platform;

const DEPOSIT_ACCOUNTS_KEY: &str = "deposit_accounts";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositChannel {
    pub name: String,
    pub number: String,
    pub instructions: String,
}

impl DepositChannel {
    fn named(name: &str) -> Self {
        DepositChannel {
            name: name.to_string(),
            ..DepositChannel::default()
        }
    }

    /// Trim every field; a blank name falls back to `default_name`.
    fn normalized(self, default_name: &str) -> Self {
        let name = self.name.trim();
        DepositChannel {
            name: if name.is_empty() { default_name } else { name }.to_string(),
            number: self.number.trim().to_string(),
            instructions: self.instructions.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAccounts {
    pub easypaisa: DepositChannel,
    pub jazzcash: DepositChannel,
}

impl Default for DepositAccounts {
    fn default() -> Self {
        DepositAccounts {
            easypaisa: DepositChannel::named("Easypaisa"),
            jazzcash: DepositChannel::named("JazzCash"),
        }
    }
}

impl Platform {
    /// Current deposit channels, or the unconfigured defaults.
    pub async fn deposit_accounts(&self) -> Result<DepositAccounts> {
        self.store
            .unit_of_work("deposit_accounts", |conn| {
                Box::pin(async move {
                    let row: Option<(String,)> =
                        sqlx::query_as("SELECT value FROM platform_settings WHERE key = ?1")
                            .bind(DEPOSIT_ACCOUNTS_KEY)
                            .fetch_optional(&mut *conn)
                            .await
                            .map_err(storage_error)?;
                    match row {
                        Some((json,)) => serde_json::from_str(&json).map_err(|e| {
                            LedgerError::StorageUnavailable(format!(
                                "corrupt {DEPOSIT_ACCOUNTS_KEY} setting: {e}"
                            ))
                        }),
                        None => Ok(DepositAccounts::default()),
                    }
                })
            })
            .await
    }

    pub async fn update_deposit_accounts(&self, update: DepositAccounts) -> Result<DepositAccounts> {
        let settings = DepositAccounts {
            easypaisa: update.easypaisa.normalized("Easypaisa"),
            jazzcash: update.jazzcash.normalized("JazzCash"),
        };
        let json = serde_json::to_string(&settings)
            .map_err(|e| LedgerError::Validation(format!("unserializable settings: {e}")))?;

        self.store
            .unit_of_work("update_deposit_accounts", move |conn| {
                let json = json.clone();
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO platform_settings (key, value) VALUES (?1, ?2)
                        ON CONFLICT (key) DO UPDATE SET value = excluded.value
                        "#,
                    )
                    .bind(DEPOSIT_ACCOUNTS_KEY)
                    .bind(&json)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_error)?;
                    Ok(())
                })
            })
            .await?;

        info!("Deposit account settings updated");
        Ok(settings)
    }
}
