//! Credential store used by cookie-rotating client managers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

use super::StoreError;
use crate::models::Target;

/// Outcome of the last request made with a cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieStatus {
    #[default]
    Unused,
    Success,
    Failed,
}

/// One stored credential of a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Assigned by the store on insert
    pub id: u64,
    pub site_name: String,
    /// JSON object text, `{"name": "value", ...}`
    pub content: String,
    pub cookie_name: String,
    /// Usable for every target of the site
    pub is_universal: bool,
    /// Generated by the site itself rather than supplied by a user
    pub is_anonymous: bool,
    pub last_usage: DateTime<Utc>,
    pub cooldown: Duration,
    pub status: CookieStatus,
}

impl Cookie {
    pub fn new(site_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            site_name: site_name.into(),
            content: content.into(),
            cookie_name: "unnamed cookie".to_string(),
            is_universal: false,
            is_anonymous: false,
            last_usage: DateTime::<Utc>::MIN_UTC,
            cooldown: Duration::ZERO,
            status: CookieStatus::Unused,
        }
    }

    /// Whether the cooldown since the last use has fully elapsed
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.cooldown) {
            Ok(cooldown) => self
                .last_usage
                .checked_add_signed(cooldown)
                .is_some_and(|ready_at| ready_at < now),
            Err(_) => false,
        }
    }
}

/// Persistence contract for site credentials
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Universal cookies of the site plus the ones bound to `target`
    async fn get_cookies(
        &self,
        site_name: &str,
        target: Option<&Target>,
    ) -> Result<Vec<Cookie>, StoreError>;

    async fn get_anonymous_cookie(&self, site_name: &str) -> Result<Option<Cookie>, StoreError>;

    /// Insert a cookie and return its assigned id
    async fn add_cookie(&self, cookie: Cookie) -> Result<u64, StoreError>;

    async fn update_cookie(&self, cookie: &Cookie) -> Result<(), StoreError>;

    async fn get_cookie_by_id(&self, id: u64) -> Result<Cookie, StoreError>;

    async fn bind_target(&self, cookie_id: u64, target: &Target) -> Result<(), StoreError>;
}

#[derive(Default)]
struct CookieTable {
    next_id: u64,
    cookies: BTreeMap<u64, Cookie>,
    bindings: HashSet<(u64, Target)>,
}

/// Process-local [`CookieStore`]
#[derive(Default)]
pub struct MemoryCookieStore {
    table: RwLock<CookieTable>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn get_cookies(
        &self,
        site_name: &str,
        target: Option<&Target>,
    ) -> Result<Vec<Cookie>, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .cookies
            .values()
            .filter(|c| c.site_name == site_name)
            .filter(|c| {
                c.is_universal
                    || target.is_some_and(|t| table.bindings.contains(&(c.id, t.clone())))
            })
            .cloned()
            .collect())
    }

    async fn get_anonymous_cookie(&self, site_name: &str) -> Result<Option<Cookie>, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .cookies
            .values()
            .find(|c| c.site_name == site_name && c.is_anonymous)
            .cloned())
    }

    async fn add_cookie(&self, mut cookie: Cookie) -> Result<u64, StoreError> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let id = table.next_id;
        cookie.id = id;
        table.cookies.insert(id, cookie);
        Ok(id)
    }

    async fn update_cookie(&self, cookie: &Cookie) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        match table.cookies.get_mut(&cookie.id) {
            Some(stored) => {
                *stored = cookie.clone();
                Ok(())
            }
            None => Err(StoreError::CookieNotFound(cookie.id)),
        }
    }

    async fn get_cookie_by_id(&self, id: u64) -> Result<Cookie, StoreError> {
        let table = self.table.read().await;
        table
            .cookies
            .get(&id)
            .cloned()
            .ok_or(StoreError::CookieNotFound(id))
    }

    async fn bind_target(&self, cookie_id: u64, target: &Target) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        if !table.cookies.contains_key(&cookie_id) {
            return Err(StoreError::CookieNotFound(cookie_id));
        }
        table.bindings.insert((cookie_id, target.clone()));
        Ok(())
    }
}
