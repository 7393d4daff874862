use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::SmsGraphError;

/// One delegated token pair per principal. The access token may be expired;
/// the refresh token is retained until explicit revocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub principal_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A Graph change-notification subscription as confirmed by the upstream.
/// `expires_at` always reflects the upstream-acknowledged value.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub resource: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>, SmsGraphError>;
    /// Atomic whole-record replacement. Rejects records with an empty
    /// refresh token.
    fn put(&self, record: &CredentialRecord) -> Result<(), SmsGraphError>;
    /// Replace the access token and expiry in place, keeping the stored
    /// refresh token. Fails with NotFound when no record exists.
    fn update_access_token(
        &self,
        principal_id: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SmsGraphError>;
    fn clear(&self, principal_id: &str) -> Result<(), SmsGraphError>;
}

pub trait SubscriptionStore: Send + Sync {
    fn save(&self, record: &SubscriptionRecord) -> Result<(), SmsGraphError>;
    fn get(&self, subscription_id: &str) -> Result<Option<SubscriptionRecord>, SmsGraphError>;
    fn list(&self) -> Result<Vec<SubscriptionRecord>, SmsGraphError>;
    fn update_expiry(
        &self,
        subscription_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SmsGraphError>;
    fn delete(&self, subscription_id: &str) -> Result<(), SmsGraphError>;
    /// Everything expiring within `window` of now, already-expired records
    /// included. Expiry is evaluated lazily against the stored timestamp;
    /// repeated calls may return the same record until a renewal lands.
    fn renew_due(&self, window: Duration) -> Result<Vec<SubscriptionRecord>, SmsGraphError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(data_dir: &str) -> Result<Self, SmsGraphError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = Path::new(data_dir).join("smsgraph.db");

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                principal_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_id TEXT PRIMARY KEY,
                resource TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_expires
                ON subscriptions(expires_at);",
        )?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, SmsGraphError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SmsGraphError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}

impl CredentialStore for Database {
    fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>, SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT principal_id, access_token, refresh_token, expires_at
                 FROM credentials WHERE principal_id = ?1",
                params![principal_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(principal_id, access_token, refresh_token, expires_at)| {
            Ok(CredentialRecord {
                principal_id,
                access_token,
                refresh_token,
                expires_at: parse_ts(&expires_at)?,
            })
        })
        .transpose()
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), SmsGraphError> {
        if record.refresh_token.is_empty() {
            return Err(SmsGraphError::InvalidRecord(
                "credential record requires a non-empty refresh token".into(),
            ));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO credentials (principal_id, access_token, refresh_token, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.principal_id,
                record.access_token,
                record.refresh_token,
                record.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_access_token(
        &self,
        principal_id: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE credentials SET access_token = ?2, expires_at = ?3 WHERE principal_id = ?1",
            params![principal_id, access_token, expires_at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(SmsGraphError::NotFound(format!(
                "no credential for principal {principal_id}"
            )));
        }
        Ok(())
    }

    fn clear(&self, principal_id: &str) -> Result<(), SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM credentials WHERE principal_id = ?1",
            params![principal_id],
        )?;
        Ok(())
    }
}

impl SubscriptionStore for Database {
    fn save(&self, record: &SubscriptionRecord) -> Result<(), SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO subscriptions (subscription_id, resource, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.subscription_id,
                record.resource,
                record.expires_at.to_rfc3339(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, subscription_id: &str) -> Result<Option<SubscriptionRecord>, SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT subscription_id, resource, expires_at, created_at
                 FROM subscriptions WHERE subscription_id = ?1",
                params![subscription_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(subscription_id, resource, expires_at, created_at)| {
            Ok(SubscriptionRecord {
                subscription_id,
                resource,
                expires_at: parse_ts(&expires_at)?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    fn list(&self) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT subscription_id, resource, expires_at, created_at
             FROM subscriptions ORDER BY expires_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(subscription_id, resource, expires_at, created_at)| {
                Ok(SubscriptionRecord {
                    subscription_id,
                    resource,
                    expires_at: parse_ts(&expires_at)?,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }

    fn update_expiry(
        &self,
        subscription_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE subscriptions SET expires_at = ?2 WHERE subscription_id = ?1",
            params![subscription_id, expires_at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(SmsGraphError::NotFound(format!(
                "no subscription {subscription_id}"
            )));
        }
        Ok(())
    }

    fn delete(&self, subscription_id: &str) -> Result<(), SmsGraphError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM subscriptions WHERE subscription_id = ?1",
            params![subscription_id],
        )?;
        Ok(())
    }

    fn renew_due(&self, window: Duration) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
        let now = Utc::now();
        Ok(self
            .list()?
            .into_iter()
            .filter(|sub| sub.expires_at - now <= window)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> (Database, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("smsgraph_store_test_{}", Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (db, dir)
    }

    fn credential(expires_at: DateTime<Utc>) -> CredentialRecord {
        CredentialRecord {
            principal_id: "default".into(),
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_at,
        }
    }

    fn subscription(id: &str, expires_at: DateTime<Utc>) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_id: id.into(),
            resource: "me/mailFolders('Inbox')/messages".into(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_credential_roundtrip() {
        let (db, dir) = test_db();
        let expires = Utc::now() + Duration::hours(1);
        db.put(&credential(expires)).unwrap();

        let got = CredentialStore::get(&db, "default").unwrap().unwrap();
        assert_eq!(got.access_token, "at-1");
        assert_eq!(got.refresh_token, "rt-1");
        // RFC3339 roundtrip keeps sub-second precision
        assert_eq!(got.expires_at, expires);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_credential_absent() {
        let (db, dir) = test_db();
        assert!(CredentialStore::get(&db, "default").unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_put_rejects_empty_refresh_token() {
        let (db, dir) = test_db();
        let mut rec = credential(Utc::now());
        rec.refresh_token = String::new();
        assert!(matches!(
            db.put(&rec),
            Err(SmsGraphError::InvalidRecord(_))
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_update_access_token_keeps_refresh_token() {
        let (db, dir) = test_db();
        db.put(&credential(Utc::now())).unwrap();

        let new_expiry = Utc::now() + Duration::hours(2);
        db.update_access_token("default", "at-2", new_expiry).unwrap();

        let got = CredentialStore::get(&db, "default").unwrap().unwrap();
        assert_eq!(got.access_token, "at-2");
        assert_eq!(got.refresh_token, "rt-1");
        assert_eq!(got.expires_at, new_expiry);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_update_access_token_not_found() {
        let (db, dir) = test_db();
        let err = db
            .update_access_token("default", "at", Utc::now())
            .unwrap_err();
        assert!(matches!(err, SmsGraphError::NotFound(_)));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (db, dir) = test_db();
        db.put(&credential(Utc::now())).unwrap();
        db.clear("default").unwrap();
        db.clear("default").unwrap();
        assert!(CredentialStore::get(&db, "default").unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_subscription_roundtrip_and_update() {
        let (db, dir) = test_db();
        let expires = Utc::now() + Duration::hours(70);
        db.save(&subscription("sub-1", expires)).unwrap();

        let new_expiry = Utc::now() + Duration::hours(140);
        db.update_expiry("sub-1", new_expiry).unwrap();

        let got = SubscriptionStore::get(&db, "sub-1").unwrap().unwrap();
        assert_eq!(got.expires_at, new_expiry);

        db.delete("sub-1").unwrap();
        assert!(SubscriptionStore::get(&db, "sub-1").unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_update_expiry_not_found() {
        let (db, dir) = test_db();
        assert!(matches!(
            db.update_expiry("missing", Utc::now()),
            Err(SmsGraphError::NotFound(_))
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_renew_due_window_boundaries() {
        let (db, dir) = test_db();
        // expires in 30 minutes
        db.save(&subscription("soon", Utc::now() + Duration::minutes(30)))
            .unwrap();
        // already expired
        db.save(&subscription("expired", Utc::now() - Duration::minutes(5)))
            .unwrap();
        // expires in 3 days
        db.save(&subscription("fresh", Utc::now() + Duration::days(3)))
            .unwrap();

        // Window of one hour catches the expiring and the expired record
        let due = db.renew_due(Duration::hours(1)).unwrap();
        let ids: Vec<&str> = due.iter().map(|s| s.subscription_id.as_str()).collect();
        assert!(ids.contains(&"soon"));
        assert!(ids.contains(&"expired"));
        assert!(!ids.contains(&"fresh"));

        // Zero window excludes anything expiring in the future
        let due = db.renew_due(Duration::zero()).unwrap();
        let ids: Vec<&str> = due.iter().map(|s| s.subscription_id.as_str()).collect();
        assert_eq!(ids, vec!["expired"]);

        // Window larger than remaining lifetime includes every record
        let due = db.renew_due(Duration::days(30)).unwrap();
        assert_eq!(due.len(), 3);

        let _ = std::fs::remove_dir_all(dir);
    }
}
