//! Surface grouping per sync session
//!
//! Every surface opened for a batch joins the session's group. When the
//! host has discarded the group (the user closed it) a new one is created
//! transparently. Grouping never fails a sync; callers log and move on.

use std::sync::Arc;

use chrono::{DateTime, Local};

use crosspost_core::prelude::*;
use crosspost_core::{GroupToken, SurfaceRef};
use crosspost_host::HostSurface;

use crate::session::GroupSlot;

/// Group label: local time as `M/D H:MM:SS`
pub fn group_title(at: DateTime<Local>) -> String {
    at.format("%-m/%-d %-H:%M:%S").to_string()
}

pub struct GroupingCoordinator<H> {
    host: Arc<H>,
}

impl<H> Clone for GroupingCoordinator<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
        }
    }
}

impl<H: HostSurface + Sync> GroupingCoordinator<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    /// The session's group if the host still knows it, else a new group
    /// seeded with `seed`
    pub async fn ensure_group(
        &self,
        slot: &mut Option<GroupToken>,
        seed: &SurfaceRef,
    ) -> Result<GroupToken> {
        if let Some(token) = slot.as_ref() {
            match self.host.group_exists(token).await {
                Ok(true) => return Ok(token.clone()),
                Ok(false) => debug!("Group {} was discarded, creating a new one", token),
                Err(e) => warn!("Could not check group {}: {}", token, e),
            }
        }

        let token = self
            .host
            .group_surfaces(std::slice::from_ref(seed), None)
            .await?;
        let title = group_title(Local::now());
        if let Err(e) = self.host.label_group(&token, &title).await {
            warn!("Could not label group {}: {}", token, e);
        }
        debug!("Created group {} ({})", token, title);
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Add `surface` to the session's group, recreating it when missing
    pub async fn add_surface(
        &self,
        slot: &mut Option<GroupToken>,
        surface: &SurfaceRef,
    ) -> Result<GroupToken> {
        let Some(token) = slot.clone() else {
            return self.ensure_group(slot, surface).await;
        };

        match self
            .host
            .group_surfaces(std::slice::from_ref(surface), Some(&token))
            .await
        {
            Ok(joined) => {
                *slot = Some(joined.clone());
                Ok(joined)
            }
            Err(Error::GroupMissing { .. }) => {
                debug!("Group {} is gone, regrouping {}", token, surface);
                *slot = None;
                self.ensure_group(slot, surface).await
            }
            Err(e) => Err(e),
        }
    }

    /// [`add_surface`](Self::add_surface) on a shared slot; failures are
    /// logged only
    pub async fn join(&self, group: &GroupSlot, surface: &SurfaceRef) -> Option<GroupToken> {
        let mut slot = group.lock().await;
        match self.add_surface(&mut slot, surface).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Could not group surface {}: {}", surface, e);
                None
            }
        }
    }
}
