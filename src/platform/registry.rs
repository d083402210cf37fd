//! Static table of available platforms

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::new_message::{FetchOptions, NewMessageFetcher};
use super::rss::{Rss, RssVariant};
use super::{PlatformError, PlatformFetcher, PlatformGroup};
use crate::site::Site;

/// Collects platform fetchers before building the registry
#[derive(Default)]
pub struct PlatformRegistryBuilder {
    fetchers: Vec<Arc<dyn PlatformFetcher>>,
}

impl PlatformRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, fetcher: Arc<dyn PlatformFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Add the platforms shipped with the crate
    pub fn with_builtin(self, options: &FetchOptions) -> Self {
        [RssVariant::Full, RssVariant::TitleOnly, RssVariant::BodyOnly]
            .into_iter()
            .fold(self, |builder, variant| {
                builder.register(Arc::new(NewMessageFetcher::new(
                    Rss::new(variant),
                    options.clone(),
                )))
            })
    }

    /// Group fetchers sharing a platform name and check site consistency
    pub fn build(self) -> Result<PlatformRegistry, PlatformError> {
        let mut by_name: BTreeMap<String, Vec<Arc<dyn PlatformFetcher>>> = BTreeMap::new();
        for fetcher in self.fetchers {
            let meta = fetcher.meta();
            if !meta.enabled {
                debug!(platform = %meta.platform_name, "Skipping disabled platform");
                continue;
            }
            by_name
                .entry(meta.platform_name.clone())
                .or_default()
                .push(fetcher);
        }

        let mut platforms = BTreeMap::new();
        for (name, mut fetchers) in by_name {
            let fetcher: Arc<dyn PlatformFetcher> = if fetchers.len() == 1 {
                fetchers.remove(0)
            } else {
                Arc::new(PlatformGroup::new(fetchers)?)
            };
            platforms.insert(name, fetcher);
        }

        let mut sites: BTreeMap<String, Site> = BTreeMap::new();
        for fetcher in platforms.values() {
            let site = &fetcher.meta().site;
            match sites.get(&site.name) {
                Some(existing) if existing != site => {
                    return Err(PlatformError::registration(format!(
                        "platforms of site {} disagree on its configuration",
                        site.name
                    )));
                }
                Some(_) => {}
                None => {
                    sites.insert(site.name.clone(), site.clone());
                }
            }
        }

        Ok(PlatformRegistry { platforms, sites })
    }
}

/// Platform name to fetcher, built once at startup
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, Arc<dyn PlatformFetcher>>,
    sites: BTreeMap<String, Site>,
}

impl PlatformRegistry {
    pub fn builder() -> PlatformRegistryBuilder {
        PlatformRegistryBuilder::new()
    }

    /// Registry holding only the built-in platforms
    pub fn builtin(options: &FetchOptions) -> Result<Self, PlatformError> {
        Self::builder().with_builtin(options).build()
    }

    pub fn get(&self, platform_name: &str) -> Option<&Arc<dyn PlatformFetcher>> {
        self.platforms.get(platform_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    pub fn site(&self, site_name: &str) -> Option<&Site> {
        self.sites.get(site_name)
    }

    /// Names of the platforms polled on the given site
    pub fn platforms_of_site(&self, site_name: &str) -> Vec<String> {
        self.platforms
            .iter()
            .filter(|(_, f)| f.meta().site.name == site_name)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Platforms that cannot run with the current configuration, with the reason
    pub fn unavailable_platforms(&self, use_browser: bool) -> BTreeMap<String, String> {
        self.platforms
            .iter()
            .filter(|(_, f)| f.meta().site.require_browser && !use_browser)
            .map(|(name, f)| {
                (
                    name.clone(),
                    format!("site {} requires a browser", f.meta().site.name),
                )
            })
            .collect()
    }
}
