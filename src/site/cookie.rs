//! Cookie-rotating client manager
//!
//! Every request for a target picks the least recently used cookie among the
//! site's universal cookies and those bound to the target, skipping cookies
//! still in their cooldown. The outcome of each response is written back to
//! the store.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use super::http::{HttpClient, HttpResponse, HttpSettings, ResponseHook};
use super::{ClientManager, SiteError};
use crate::metrics;
use crate::models::Target;
use crate::storage::{Cookie, CookieStatus, CookieStore};
use crate::utils::flatten_text;

/// Cooldown applied to user-supplied cookies
pub const DEFAULT_COOKIE_COOLDOWN: Duration = Duration::from_secs(15);

/// Writes the result of each response back to the cookie that made it
struct CookieWriteBack {
    cookie: Mutex<Cookie>,
    store: Arc<dyn CookieStore>,
}

#[async_trait]
impl ResponseHook for CookieWriteBack {
    async fn on_response(&self, response: &HttpResponse) {
        let mut cookie = self.cookie.lock().await;
        if response.status.as_u16() == 200 {
            trace!(cookie_id = cookie.id, url = %response.url, "Cookie request succeeded");
            cookie.status = CookieStatus::Success;
        } else {
            warn!(
                cookie_id = cookie.id,
                url = %response.url,
                status = response.status.as_u16(),
                "Cookie request failed"
            );
            cookie.status = CookieStatus::Failed;
        }
        cookie.last_usage = Utc::now();
        if let Err(e) = self.store.update_cookie(&cookie).await {
            warn!(cookie_id = cookie.id, error = %e, "Failed to persist cookie usage");
        }
    }
}

pub struct CookieClientManager {
    site_name: String,
    settings: HttpSettings,
    store: Arc<dyn CookieStore>,
    default_cooldown: Duration,
    // serializes cookie selection and anonymous cookie refresh
    lock: Mutex<()>,
}

impl CookieClientManager {
    pub fn new(
        site_name: impl Into<String>,
        settings: HttpSettings,
        store: Arc<dyn CookieStore>,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            settings,
            store,
            default_cooldown: DEFAULT_COOKIE_COOLDOWN,
            lock: Mutex::new(()),
        }
    }

    pub fn with_default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    fn anonymous_cookie(&self) -> Cookie {
        let mut cookie = Cookie::new(self.site_name.clone(), "{}");
        cookie.cookie_name = format!("{} anonymous", self.site_name);
        cookie.is_universal = true;
        cookie.is_anonymous = true;
        cookie.last_usage = Utc::now();
        cookie.cooldown = Duration::ZERO;
        cookie
    }

    /// Pick the least recently used cookie whose cooldown has elapsed
    ///
    /// The chosen cookie is marked as used immediately so that concurrent
    /// schedulers sharing the store do not pick it again within its cooldown.
    pub async fn choose_cookie(&self, target: Option<&Target>) -> Result<Cookie, SiteError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        let mut cookie = self
            .store
            .get_cookies(&self.site_name, target)
            .await?
            .into_iter()
            .filter(|c| c.is_available(now))
            .min_by_key(|c| c.last_usage)
            .ok_or_else(|| SiteError::NoAvailableCookie {
                site_name: self.site_name.clone(),
            })?;

        cookie.last_usage = now;
        self.store.update_cookie(&cookie).await?;
        Ok(cookie)
    }

    /// Store a user-supplied cookie after checking its content
    pub async fn add_identified_cookie(
        &self,
        content: &str,
        cookie_name: Option<&str>,
    ) -> Result<Cookie, SiteError> {
        if !self.validate_cookie(content) {
            return Err(SiteError::InvalidCookie(content.to_string()));
        }

        let mut cookie = Cookie::new(self.site_name.clone(), content);
        cookie.cookie_name = cookie_name
            .map(str::to_string)
            .unwrap_or_else(|| self.cookie_name(content));
        cookie.cooldown = self.default_cooldown;

        let id = self.store.add_cookie(cookie).await?;
        Ok(self.store.get_cookie_by_id(id).await?)
    }

    /// Cookie content must be a JSON object
    pub fn validate_cookie(&self, content: &str) -> bool {
        matches!(
            serde_json::from_str::<serde_json::Value>(content),
            Ok(serde_json::Value::Object(_))
        )
    }

    /// Display name derived from the cookie content
    pub fn cookie_name(&self, content: &str) -> String {
        let head: String = content.chars().take(10).collect();
        flatten_text(&format!("{} [{}]", self.site_name, head))
    }

    async fn refresh_anonymous_cookie(&self) -> Result<(), SiteError> {
        let _guard = self.lock.lock().await;
        let mut fresh = self.anonymous_cookie();
        match self.store.get_anonymous_cookie(&self.site_name).await? {
            Some(existing) => {
                fresh.id = existing.id;
                self.store.update_cookie(&fresh).await?;
            }
            None => {
                self.store.add_cookie(fresh).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClientManager for CookieClientManager {
    async fn get_client(&self, target: Option<&Target>) -> Result<HttpClient, SiteError> {
        let cookie = self.choose_cookie(target).await?;
        metrics::record_cookie_choose(&self.site_name, cookie.id);

        if cookie.is_universal {
            trace!(site = %self.site_name, "No identified cookie available, using universal cookie");
        } else {
            trace!(site = %self.site_name, cookie_id = cookie.id, "Using identified cookie");
        }

        let client = HttpClient::with_cookies(&self.settings, &cookie.content)?;
        client.add_hook(Arc::new(CookieWriteBack {
            cookie: Mutex::new(cookie),
            store: Arc::clone(&self.store),
        }));
        Ok(client)
    }

    async fn get_client_for_static(&self) -> Result<HttpClient, SiteError> {
        Ok(HttpClient::new(&self.settings)?)
    }

    async fn get_query_name_client(&self) -> Result<HttpClient, SiteError> {
        Ok(HttpClient::new(&self.settings)?)
    }

    async fn refresh_client(&self) -> Result<(), SiteError> {
        self.refresh_anonymous_cookie().await
    }

    async fn on_init_scheduler(&self) -> Result<(), SiteError> {
        self.refresh_anonymous_cookie().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCookieStore;

    fn manager(store: Arc<MemoryCookieStore>) -> CookieClientManager {
        CookieClientManager::new("weibo", HttpSettings::default(), store)
    }

    #[test]
    fn test_cookie_name_and_validation() {
        let mgr = manager(Arc::new(MemoryCookieStore::new()));
        assert_eq!(mgr.cookie_name("{\"SUB\":\n\"abcdef\"}"), "weibo [{\"SUB\": \"a]");
        assert!(mgr.validate_cookie("{\"a\": 1}"));
        assert!(!mgr.validate_cookie("[1]"));
        assert!(!mgr.validate_cookie("not json"));
    }

    #[tokio::test]
    async fn test_refresh_creates_then_reuses_anonymous_cookie() {
        let store = Arc::new(MemoryCookieStore::new());
        let mgr = manager(store.clone());

        mgr.refresh_client().await.unwrap();
        let first = store.get_anonymous_cookie("weibo").await.unwrap().unwrap();
        mgr.refresh_client().await.unwrap();
        let second = store.get_anonymous_cookie("weibo").await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.is_universal);
        assert_eq!(second.content, "{}");
        assert_eq!(store.get_cookies("weibo", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_choose_least_recently_used() {
        let store = Arc::new(MemoryCookieStore::new());
        let mgr = manager(store.clone());

        let a = mgr.add_identified_cookie("{\"k\":\"a\"}", Some("a")).await.unwrap();
        let b = mgr.add_identified_cookie("{\"k\":\"b\"}", Some("b")).await.unwrap();
        for id in [a.id, b.id] {
            let mut c = store.get_cookie_by_id(id).await.unwrap();
            c.is_universal = true;
            c.last_usage = Utc::now() - chrono::Duration::seconds(if id == a.id { 60 } else { 120 });
            store.update_cookie(&c).await.unwrap();
        }

        let chosen = mgr.choose_cookie(None).await.unwrap();
        assert_eq!(chosen.id, b.id);

        // b is now cooling down, a is next
        let chosen = mgr.choose_cookie(None).await.unwrap();
        assert_eq!(chosen.id, a.id);

        let err = mgr.choose_cookie(None).await.unwrap_err();
        assert!(err.is_skip());
    }

    #[tokio::test]
    async fn test_invalid_identified_cookie_rejected() {
        let mgr = manager(Arc::new(MemoryCookieStore::new()));
        let err = mgr.add_identified_cookie("oops", None).await.unwrap_err();
        assert!(matches!(err, SiteError::InvalidCookie(_)));
    }
}
