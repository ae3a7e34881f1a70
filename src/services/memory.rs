//! Process-local implementations of the service traits.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    FinancialRecord, FinancialService, Login, NewRecord, Registration, ServiceError,
    SymbolSummary, User, UserService,
};

const MIN_PASSWORD_LEN: usize = 8;

struct StoredUser {
    user: User,
    salt: [u8; 16],
    digest: [u8; 32],
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[derive(Default)]
pub struct MemoryUsers {
    // email -> user
    users: RwLock<HashMap<String, StoredUser>>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserService for MemoryUsers {
    async fn register(&self, registration: Registration) -> Result<User, ServiceError> {
        let email = registration.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ServiceError::Invalid("email is not valid".into()));
        }
        if registration.password.len() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(ServiceError::Invalid("name is required".into()));
        }

        let mut users = self.users.write().await;
        if users.contains_key(&email) {
            return Err(ServiceError::Conflict(format!("user {email}")));
        }
        let salt: [u8; 16] = rand::thread_rng().r#gen();
        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            name: name.to_owned(),
            created_at: Utc::now(),
        };
        users.insert(
            email,
            StoredUser { user: user.clone(), salt, digest: digest(&salt, &registration.password) },
        );
        Ok(user)
    }

    async fn login(&self, login: Login) -> Result<User, ServiceError> {
        let email = login.email.trim().to_lowercase();
        let users = self.users.read().await;
        let stored = users.get(&email).ok_or(ServiceError::BadCredentials)?;
        if digest(&stored.salt, &login.password) != stored.digest {
            return Err(ServiceError::BadCredentials);
        }
        Ok(stored.user.clone())
    }

    async fn profile(&self, id: Uuid) -> Result<User, ServiceError> {
        self.users
            .read()
            .await
            .values()
            .find(|s| s.user.id == id)
            .map(|s| s.user.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("user {id}")))
    }
}

#[derive(Default)]
pub struct MemoryFinancial {
    records: RwLock<Vec<FinancialRecord>>,
}

impl MemoryFinancial {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FinancialService for MemoryFinancial {
    async fn list(&self, user_id: Uuid) -> Result<Vec<FinancialRecord>, ServiceError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create(&self, user_id: Uuid, record: NewRecord) -> Result<FinancialRecord, ServiceError> {
        let symbol = record.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ServiceError::Invalid("symbol is required".into()));
        }
        if !record.price.is_finite() || record.price <= 0.0 {
            return Err(ServiceError::Invalid("price must be a positive number".into()));
        }
        let created = FinancialRecord {
            id: Uuid::new_v4(),
            user_id,
            symbol,
            price: record.price,
            volume: record.volume,
            timestamp: Utc::now(),
            metadata: record.metadata,
        };
        self.records.write().await.push(created.clone());
        Ok(created)
    }

    async fn analytics(&self, user_id: Uuid) -> Result<Vec<SymbolSummary>, ServiceError> {
        let records = self.records.read().await;
        let mut by_symbol: BTreeMap<&str, Vec<&FinancialRecord>> = BTreeMap::new();
        for r in records.iter().filter(|r| r.user_id == user_id) {
            by_symbol.entry(r.symbol.as_str()).or_default().push(r);
        }
        Ok(by_symbol
            .into_iter()
            .map(|(symbol, rs)| {
                let total_price: f64 = rs.iter().map(|r| r.price).sum();
                SymbolSummary {
                    symbol: symbol.to_owned(),
                    records: rs.len(),
                    average_price: total_price / rs.len() as f64,
                    total_volume: rs.iter().map(|r| r.volume).sum(),
                    // Records are appended in creation order.
                    latest_price: rs.last().map(|r| r.price).unwrap_or_default(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(email: &str) -> Registration {
        Registration { email: email.into(), password: "correct horse".into(), name: "Ada".into() }
    }

    #[tokio::test]
    async fn register_then_login() {
        let users = MemoryUsers::new();
        let user = users.register(registration("Ada@Example.com")).await.unwrap();
        assert_eq!(user.email, "ada@example.com");

        let logged_in = users
            .login(Login { email: "ada@example.com".into(), password: "correct horse".into() })
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);

        assert!(matches!(
            users.login(Login { email: "ada@example.com".into(), password: "wrong".into() }).await,
            Err(ServiceError::BadCredentials)
        ));
        assert_eq!(users.profile(user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let users = MemoryUsers::new();
        users.register(registration("a@b.c")).await.unwrap();
        assert!(matches!(
            users.register(registration("A@B.C")).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn short_password_is_invalid() {
        let users = MemoryUsers::new();
        let mut reg = registration("a@b.c");
        reg.password = "short".into();
        assert!(matches!(users.register(reg).await, Err(ServiceError::Invalid(_))));
    }

    #[tokio::test]
    async fn analytics_aggregates_per_symbol() {
        let fin = MemoryFinancial::new();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        for (symbol, price, volume) in [("aapl", 10.0, 5), ("AAPL", 20.0, 7), ("msft", 3.0, 1)] {
            fin.create(me, NewRecord { symbol: symbol.into(), price, volume, metadata: None })
                .await
                .unwrap();
        }
        fin.create(other, NewRecord { symbol: "AAPL".into(), price: 99.0, volume: 1, metadata: None })
            .await
            .unwrap();

        let summary = fin.analytics(me).await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].symbol, "AAPL");
        assert_eq!(summary[0].records, 2);
        assert_eq!(summary[0].average_price, 15.0);
        assert_eq!(summary[0].total_volume, 12);
        assert_eq!(summary[0].latest_price, 20.0);
        assert_eq!(fin.list(me).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_positive_price_is_invalid() {
        let fin = MemoryFinancial::new();
        let res = fin
            .create(Uuid::new_v4(), NewRecord { symbol: "X".into(), price: 0.0, volume: 1, metadata: None })
            .await;
        assert!(matches!(res, Err(ServiceError::Invalid(_))));
    }
}
