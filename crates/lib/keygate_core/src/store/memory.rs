//! In-memory credential store for tests and local development.
//!
//! Token consumption uses `DashMap::remove_if`, so exactly one caller wins a
//! race for the same digest. Writes that touch more than one index (user
//! creation, token slot replacement) run under `write_lock`.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, StoreError, StoreResult};
use crate::models::auth::{AccountToken, NewUser, RefreshTokenRecord, TokenPurpose, User};
use crate::uuid::uuidv7;

/// In-memory store keyed the same way as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    next_id: AtomicI64,
    users: DashMap<i64, User>,
    by_username: DashMap<String, i64>,
    /// Keyed on the lower-cased address.
    by_email: DashMap<String, i64>,
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
    account_tokens: DashMap<String, AccountToken>,
    /// (owner, purpose) → digest of the single live token in that slot.
    slots: DashMap<(i64, TokenPurpose), String>,
    write_lock: Mutex<()>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored refresh tokens (live or not).
    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }

    /// Number of stored account tokens (live or not).
    pub fn account_token_count(&self) -> usize {
        self.account_tokens.len()
    }

    fn with_user<T>(&self, user_id: i64, f: impl FnOnce(&mut User) -> T) -> StoreResult<T> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        Ok(f(&mut user))
    }

    /// Remove a live token of `purpose` and clear its slot.
    fn take_account_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Option<AccountToken> {
        let (_, token) = self
            .account_tokens
            .remove_if(token_hash, |_, t| t.purpose == purpose && t.is_live(now))?;
        self.slots
            .remove_if(&(token.user_id, purpose), |_, h| h == token_hash);
        Some(token)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>> {
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let Some(id) = self.by_username.get(username).map(|id| *id) else {
            return Ok(None);
        };
        self.find_user_by_id(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let Some(id) = self.by_email.get(&email.to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        self.find_user_by_id(id).await
    }

    async fn insert_user(&self, new_user: &NewUser) -> StoreResult<User> {
        let _guard = self.write_lock.lock().await;

        if self.by_username.contains_key(&new_user.username) {
            return Err(StoreError::Duplicate("users_username_key".into()));
        }
        let email_key = new_user.email.to_lowercase();
        if self.by_email.contains_key(&email_key) {
            return Err(StoreError::Duplicate("users_email_lower_key".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id,
            uuid: Uuid::new_v4(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash.clone(),
            scopes: new_user.scopes.clone(),
            verified_contact_methods: Vec::new(),
            provider: new_user.provider.clone(),
        };
        self.by_username.insert(user.username.clone(), id);
        self.by_email.insert(email_key, id);
        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        self.with_user(user_id, |u| u.password_hash = password_hash.to_string())
    }

    async fn set_scopes(&self, user_id: i64, scopes: &[String]) -> StoreResult<()> {
        self.with_user(user_id, |u| u.scopes = scopes.to_vec())
    }

    async fn insert_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<RefreshTokenRecord> {
        match self.refresh_tokens.entry(token_hash.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(
                "refresh_tokens_token_hash_key".into(),
            )),
            Entry::Vacant(slot) => {
                let record = RefreshTokenRecord {
                    id: uuidv7(),
                    user_id,
                    created_at,
                    expires_at,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self
            .refresh_tokens
            .get(token_hash)
            .filter(|r| r.user_id == user_id && r.is_live(now))
            .map(|r| r.value().clone()))
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<bool> {
        Ok(self.refresh_tokens.remove(token_hash).is_some())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        user_id: i64,
        new_hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let Some((_, old)) = self
            .refresh_tokens
            .remove_if(old_hash, |_, r| r.user_id == user_id && r.is_live(now))
        else {
            return Ok(None);
        };

        let inserted = match self.refresh_tokens.entry(new_hash.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let record = RefreshTokenRecord {
                    id: uuidv7(),
                    user_id,
                    created_at: now,
                    expires_at,
                };
                slot.insert(record.clone());
                Some(record)
            }
        };
        match inserted {
            Some(record) => Ok(Some(record)),
            None => {
                self.refresh_tokens.insert(old_hash.to_string(), old);
                Err(StoreError::Duplicate("refresh_tokens_token_hash_key".into()))
            }
        }
    }

    async fn put_account_token(
        &self,
        token_hash: &str,
        user_id: i64,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        if self.account_tokens.contains_key(token_hash) {
            return Err(StoreError::Duplicate("account_tokens_pkey".into()));
        }
        if let Some(previous) = self.slots.insert((user_id, purpose), token_hash.to_string()) {
            self.account_tokens.remove(&previous);
        }
        self.account_tokens.insert(
            token_hash.to_string(),
            AccountToken {
                user_id,
                purpose,
                expires_at,
            },
        );
        Ok(())
    }

    async fn find_account_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AccountToken>> {
        Ok(self
            .account_tokens
            .get(token_hash)
            .filter(|t| t.purpose == purpose && t.is_live(now))
            .map(|t| t.value().clone()))
    }

    async fn has_account_token(&self, user_id: i64, purpose: TokenPurpose) -> StoreResult<bool> {
        let Some(hash) = self.slots.get(&(user_id, purpose)).map(|h| h.value().clone()) else {
            return Ok(false);
        };
        Ok(self.account_tokens.contains_key(&hash))
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        new_password_hash: &str,
    ) -> StoreResult<Option<i64>> {
        let Some(token) = self.take_account_token(token_hash, TokenPurpose::Reset, now) else {
            return Ok(None);
        };
        self.with_user(token.user_id, |u| {
            u.password_hash = new_password_hash.to_string()
        })?;
        Ok(Some(token.user_id))
    }

    async fn consume_verify_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        let Some(token) = self.take_account_token(token_hash, TokenPurpose::Verify, now) else {
            return Ok(None);
        };
        self.with_user(token.user_id, |u| {
            if !u.verified_contact_methods.contains(&u.email) {
                let email = u.email.clone();
                u.verified_contact_methods.push(email);
            }
        })?;
        Ok(Some(token.user_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            scopes: vec!["read".into()],
            provider: None,
        }
    }

    #[tokio::test]
    async fn insert_user_enforces_unique_username_and_email() {
        let store = MemoryCredentialStore::new();
        store.insert_user(&new_user("alice", "a@x.com")).await.unwrap();

        let dup_name = store.insert_user(&new_user("alice", "b@x.com")).await;
        assert!(matches!(dup_name, Err(StoreError::Duplicate(_))));

        let dup_email = store.insert_user(&new_user("bob", "a@x.com")).await;
        assert!(matches!(dup_email, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let store = MemoryCredentialStore::new();
        let user = store
            .insert_user(&new_user("alice", "Alice@X.com"))
            .await
            .unwrap();
        assert_eq!(user.email, "Alice@X.com");

        let found = store.find_user_by_email("alice@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_user_by_email("ALICE@X.COM").await.unwrap().is_some());

        let dup = store.insert_user(&new_user("bob", "alice@x.COM")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn refresh_token_lookup_requires_matching_owner() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        store.insert_refresh_token("h1", 1, now, None).await.unwrap();

        assert!(store.find_refresh_token("h1", 1, now).await.unwrap().is_some());
        assert!(store.find_refresh_token("h1", 2, now).await.unwrap().is_none());

        let dup = store.insert_refresh_token("h1", 2, now, None).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn rotate_collision_keeps_old_token() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        store.insert_refresh_token("old", 1, now, None).await.unwrap();
        store.insert_refresh_token("taken", 2, now, None).await.unwrap();

        let dup = store.rotate_refresh_token("old", 1, "taken", now, None).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
        assert!(store.find_refresh_token("old", 1, now).await.unwrap().is_some());

        let rotated = store
            .rotate_refresh_token("old", 1, "new", now, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rotated.user_id, 1);
        assert!(store.find_refresh_token("old", 1, now).await.unwrap().is_none());
        assert!(store.find_refresh_token("new", 1, now).await.unwrap().is_some());

        let gone = store.rotate_refresh_token("old", 1, "newer", now, None).await;
        assert!(gone.unwrap().is_none());
        assert_eq!(store.refresh_token_count(), 2);
    }

    #[tokio::test]
    async fn put_account_token_replaces_previous_slot() {
        let store = MemoryCredentialStore::new();
        let exp = Utc::now() + Duration::hours(1);
        store
            .put_account_token("old", 1, TokenPurpose::Reset, exp)
            .await
            .unwrap();
        store
            .put_account_token("new", 1, TokenPurpose::Reset, exp)
            .await
            .unwrap();
        store
            .put_account_token("verify", 1, TokenPurpose::Verify, exp)
            .await
            .unwrap();

        let now = Utc::now();
        assert!(
            store
                .find_account_token("old", TokenPurpose::Reset, now)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_account_token("new", TokenPurpose::Reset, now)
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(store.account_token_count(), 2);
    }

    #[tokio::test]
    async fn purpose_slots_do_not_cross() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("alice", "a@x.com")).await.unwrap();
        let exp = Utc::now() + Duration::hours(1);
        store
            .put_account_token("tok", user.id, TokenPurpose::Verify, exp)
            .await
            .unwrap();

        let consumed = store
            .consume_reset_token("tok", Utc::now(), "new-hash")
            .await
            .unwrap();
        assert!(consumed.is_none());
    }

    #[tokio::test]
    async fn concurrent_consume_succeeds_once() {
        let store = Arc::new(MemoryCredentialStore::new());
        let user = store.insert_user(&new_user("alice", "a@x.com")).await.unwrap();
        let exp = Utc::now() + Duration::hours(1);
        store
            .put_account_token("tok", user.id, TokenPurpose::Reset, exp)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .consume_reset_token("tok", Utc::now(), &format!("hash-{i}"))
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn consume_verify_adds_email_once() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("alice", "a@x.com")).await.unwrap();
        let exp = Utc::now() + Duration::hours(1);

        for token in ["t1", "t2"] {
            store
                .put_account_token(token, user.id, TokenPurpose::Verify, exp)
                .await
                .unwrap();
            store
                .consume_verify_token(token, Utc::now())
                .await
                .unwrap()
                .unwrap();
        }

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.verified_contact_methods, vec!["a@x.com".to_string()]);
        assert!(
            !store
                .has_account_token(user.id, TokenPurpose::Verify)
                .await
                .unwrap()
        );
    }
}
