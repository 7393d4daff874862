pub mod auth;
pub mod config;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod store;
pub mod subscriptions;
pub mod tools;
pub mod twilio;
pub mod web;

pub use smsgraph_core::error;
pub use smsgraph_core::llm_types;
pub use smsgraph_core::text;

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use chrono::{DateTime, Duration, Utc};

    use crate::error::SmsGraphError;
    use crate::store::{
        CredentialRecord, CredentialStore, SubscriptionRecord, SubscriptionStore,
    };

    pub fn env_lock() -> MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    #[derive(Default)]
    pub struct MemoryCredentialStore {
        records: Mutex<HashMap<String, CredentialRecord>>,
    }

    impl CredentialStore for MemoryCredentialStore {
        fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>, SmsGraphError> {
            Ok(self.records.lock().unwrap().get(principal_id).cloned())
        }

        fn put(&self, record: &CredentialRecord) -> Result<(), SmsGraphError> {
            if record.refresh_token.is_empty() {
                return Err(SmsGraphError::InvalidRecord(
                    "refresh token must not be empty".into(),
                ));
            }
            self.records
                .lock()
                .unwrap()
                .insert(record.principal_id.clone(), record.clone());
            Ok(())
        }

        fn update_access_token(
            &self,
            principal_id: &str,
            access_token: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<(), SmsGraphError> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(principal_id)
                .ok_or_else(|| SmsGraphError::NotFound(principal_id.to_string()))?;
            record.access_token = access_token.to_string();
            record.expires_at = expires_at;
            Ok(())
        }

        fn clear(&self, principal_id: &str) -> Result<(), SmsGraphError> {
            self.records.lock().unwrap().remove(principal_id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemorySubscriptionStore {
        records: Mutex<HashMap<String, SubscriptionRecord>>,
    }

    impl SubscriptionStore for MemorySubscriptionStore {
        fn save(&self, record: &SubscriptionRecord) -> Result<(), SmsGraphError> {
            self.records
                .lock()
                .unwrap()
                .insert(record.subscription_id.clone(), record.clone());
            Ok(())
        }

        fn get(&self, subscription_id: &str) -> Result<Option<SubscriptionRecord>, SmsGraphError> {
            Ok(self.records.lock().unwrap().get(subscription_id).cloned())
        }

        fn list(&self) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        fn update_expiry(
            &self,
            subscription_id: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<(), SmsGraphError> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(subscription_id)
                .ok_or_else(|| SmsGraphError::NotFound(subscription_id.to_string()))?;
            record.expires_at = expires_at;
            Ok(())
        }

        fn delete(&self, subscription_id: &str) -> Result<(), SmsGraphError> {
            self.records.lock().unwrap().remove(subscription_id);
            Ok(())
        }

        fn renew_due(&self, window: Duration) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
            let cutoff = Utc::now() + window;
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.expires_at <= cutoff)
                .cloned()
                .collect())
        }
    }
}
