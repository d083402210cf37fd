//! Several platforms published under one platform name

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    Dispatch, FetchStrategy, ParseTargetError, PlatformError, PlatformFetcher, PlatformMeta,
    UnitResults,
};
use crate::models::{Post, Recipient, SubUnit, Target};
use crate::site::{HttpClient, ProcessContext};

/// Runs every member on each fetch and merges the posts per recipient
pub struct PlatformGroup {
    meta: PlatformMeta,
    members: Vec<Arc<dyn PlatformFetcher>>,
}

impl std::fmt::Debug for PlatformGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.meta().name.as_str()).collect();
        write!(f, "PlatformGroup[{}]", names.join(" "))
    }
}

impl PlatformGroup {
    /// Members must agree on site, display name and whether they take a
    /// target, and must declare disjoint categories
    pub fn new(members: Vec<Arc<dyn PlatformFetcher>>) -> Result<Self, PlatformError> {
        let first = members
            .first()
            .ok_or_else(|| PlatformError::registration("platform group has no members"))?
            .meta()
            .clone();

        let mut categories = BTreeMap::new();
        for member in &members {
            let meta = member.meta();
            if meta.has_target != first.has_target {
                return Err(PlatformError::registration(format!(
                    "platform {} disagrees on having a target",
                    meta.name
                )));
            }
            if meta.name != first.name {
                return Err(PlatformError::registration(format!(
                    "platform name for {} not fit",
                    first.platform_name
                )));
            }
            if meta.site != first.site {
                return Err(PlatformError::registration(format!(
                    "platform site for {} not fit",
                    first.platform_name
                )));
            }
            for (category, label) in &meta.categories {
                if categories.insert(*category, label.clone()).is_some() {
                    return Err(PlatformError::registration(format!(
                        "platform categories for {} duplicate",
                        first.platform_name
                    )));
                }
            }
        }

        let meta = PlatformMeta {
            categories,
            enable_tag: false,
            enabled: true,
            use_batch: false,
            ..first
        };
        Ok(Self { meta, members })
    }

    pub fn members(&self) -> &[Arc<dyn PlatformFetcher>] {
        &self.members
    }
}

fn merge_dispatch(merged: &mut Vec<(Recipient, Vec<Post>)>, dispatch: Dispatch) {
    for (user, posts) in dispatch {
        match merged.iter_mut().find(|(u, _)| *u == user) {
            Some((_, existing)) => existing.extend(posts),
            None => merged.push((user, posts)),
        }
    }
}

#[async_trait]
impl PlatformFetcher for PlatformGroup {
    fn meta(&self) -> &PlatformMeta {
        &self.meta
    }

    fn strategy(&self) -> FetchStrategy {
        self.members[0].strategy()
    }

    async fn fetch_new_post(
        &self,
        ctx: &ProcessContext,
        client: &HttpClient,
        sub_unit: &SubUnit,
    ) -> Result<Dispatch, PlatformError> {
        let mut results = UnitResults::new(&self.meta.platform_name);
        let mut merged = Vec::new();
        for (index, member) in self.members.iter().enumerate() {
            let result = member.fetch_new_post(ctx, client, sub_unit).await;
            let unit = format!("{}#{index}", self.meta.platform_name);
            if let Some(dispatch) = results.check(&unit, result) {
                merge_dispatch(&mut merged, dispatch);
            }
        }
        results.finish(ctx, merged)
    }

    async fn batch_fetch_new_post(
        &self,
        _ctx: &ProcessContext,
        _client: &HttpClient,
        _sub_units: &[SubUnit],
    ) -> Result<Dispatch, PlatformError> {
        Err(PlatformError::BatchUnsupported(
            self.meta.platform_name.clone(),
        ))
    }

    async fn get_target_name(
        &self,
        client: &HttpClient,
        target: &Target,
    ) -> Result<Option<String>, PlatformError> {
        self.members[0].get_target_name(client, target).await
    }

    async fn parse_target(&self, input: &str) -> Result<Target, ParseTargetError> {
        self.members[0].parse_target(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_dispatch_per_recipient() {
        let alice = Recipient::new("alice");
        let bob = Recipient::new("bob");
        let mut merged = Vec::new();

        merge_dispatch(
            &mut merged,
            vec![(alice.clone(), vec![Post::new("p", "1")]), (bob.clone(), vec![])],
        );
        merge_dispatch(&mut merged, vec![(alice.clone(), vec![Post::new("p", "2")])]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].0, alice);
        assert_eq!(merged[0].1.len(), 2);
        assert!(merged[1].1.is_empty());
    }
}
