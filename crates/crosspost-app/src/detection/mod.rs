//! Login detection chain
//!
//! Runs a platform's strategies in order and stops at the first definitive
//! answer. Cookie presence only ever yields a provisional login that later
//! strategies confirm or refute. The result cache is written only for
//! definitive logins and cleared only on definitive logouts, so an
//! inconclusive run never downgrades a cached identity.

pub mod predicate;
pub mod strategies;

use std::sync::Arc;

use chrono::Utc;

use crosspost_core::prelude::*;
use crosspost_core::{
    CookieProbe, Detection, DetectionPlan, DetectionResult, DetectionStrategy, PlatformDescriptor,
};
use crosspost_host::{HostSurface, HttpFetcher, KvStore};

use crate::cache::ResultCache;
use crate::config::DetectionSettings;
use strategies::CookieCheck;

/// Detection chain shared by every platform
pub struct DetectionChain<H, F, S> {
    host: Arc<H>,
    fetcher: Arc<F>,
    cache: Arc<ResultCache<S>>,
    settings: DetectionSettings,
}

impl<H, F, S> DetectionChain<H, F, S>
where
    H: HostSurface + Send + Sync + 'static,
    F: HttpFetcher + Send + Sync + 'static,
    S: KvStore + Send + Sync + 'static,
{
    pub fn new(
        host: Arc<H>,
        fetcher: Arc<F>,
        cache: Arc<ResultCache<S>>,
        settings: DetectionSettings,
    ) -> Self {
        Self {
            host,
            fetcher,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache<S>> {
        &self.cache
    }

    /// Resolve the login state of one platform
    ///
    /// With `refresh` the cache is bypassed for reading but still updated.
    #[instrument(skip_all, fields(platform = %descriptor.id))]
    pub async fn detect(&self, descriptor: &PlatformDescriptor, refresh: bool) -> DetectionResult {
        let plan = &descriptor.detection;
        let mut provisional: Option<DetectionResult> = None;
        let mut reasons: Vec<String> = Vec::new();
        let last = plan.strategies.len().saturating_sub(1);

        for (index, strategy) in plan.strategies.iter().enumerate() {
            trace!("Running {}", strategy.name());
            match strategy {
                DetectionStrategy::CacheLookup { .. } => {
                    if refresh {
                        continue;
                    }
                    match self.cached_result(&descriptor.id, plan.liveness_check()).await {
                        Ok(Some(result)) => {
                            debug!("Serving cached login for {}", descriptor.id);
                            return result;
                        }
                        Ok(None) => {}
                        Err(e) => reasons.push(format!("cache: {e}")),
                    }
                }

                DetectionStrategy::CookiePresence(probe) => {
                    match strategies::check_cookies(self.host.as_ref(), probe).await {
                        Ok(CookieCheck::Absent) => {
                            debug!("No session cookie for {}", descriptor.id);
                            return self
                                .finish(descriptor, Detection::logged_out(), None)
                                .await;
                        }
                        Ok(CookieCheck::Present { username }) => {
                            let result = DetectionResult::logged_in(username, None);
                            if index == last {
                                return self
                                    .finish(descriptor, Detection::LoggedIn(result), None)
                                    .await;
                            }
                            provisional = Some(result);
                        }
                        Err(e) => reasons.push(format!("{}: {e}", strategy.name())),
                    }
                }

                DetectionStrategy::AuthenticatedApiCall(probe) => {
                    let detection = strategies::call_api(
                        self.host.as_ref(),
                        self.fetcher.as_ref(),
                        probe,
                        self.settings.api_timeout(),
                    )
                    .await;
                    match detection {
                        Detection::Inconclusive { reason } => {
                            reasons.push(format!("{}: {reason}", strategy.name()))
                        }
                        definitive => {
                            return self
                                .finish(descriptor, definitive, provisional.as_ref())
                                .await
                        }
                    }
                }

                DetectionStrategy::RenderedSurfaceQuery(probe) => {
                    let detection = strategies::query_surface(
                        self.host.as_ref(),
                        probe,
                        self.settings.surface_timeout(),
                    )
                    .await;
                    match detection {
                        Detection::Inconclusive { reason } => {
                            reasons.push(format!("{}: {reason}", strategy.name()))
                        }
                        definitive => {
                            return self
                                .finish(descriptor, definitive, provisional.as_ref())
                                .await
                        }
                    }
                }

                DetectionStrategy::HtmlScrape(probe) => {
                    let detection = strategies::scrape_page(
                        self.host.as_ref(),
                        self.fetcher.as_ref(),
                        probe,
                        self.settings.api_timeout(),
                    )
                    .await;
                    match detection {
                        Detection::Inconclusive { reason } => {
                            reasons.push(format!("{}: {reason}", strategy.name()))
                        }
                        definitive => {
                            return self
                                .finish(descriptor, definitive, provisional.as_ref())
                                .await
                        }
                    }
                }
            }
        }

        Self::undecided(plan, provisional, reasons, &descriptor.id)
    }

    /// Cache hit confirmed by a session cookie
    ///
    /// An entry with no cookie to confirm it is never served.
    async fn cached_result(
        &self,
        platform_id: &str,
        liveness: Option<&CookieProbe>,
    ) -> Result<Option<DetectionResult>> {
        let Some(session) = liveness else {
            debug!("No liveness cookie for {}, skipping cache", platform_id);
            return Ok(None);
        };

        let Some(entry) = self.cache.get_valid(platform_id, Utc::now()).await? else {
            return Ok(None);
        };

        match strategies::check_cookies(self.host.as_ref(), session).await {
            Ok(CookieCheck::Present { .. }) => Ok(Some(entry.result)),
            Ok(CookieCheck::Absent) => {
                info!("Session cookie for {} is gone, evicting cache", platform_id);
                self.cache.invalidate(platform_id).await?;
                Ok(None)
            }
            Err(e) => {
                warn!("Liveness check for {} failed: {}", platform_id, e);
                Ok(None)
            }
        }
    }

    /// Apply the cache policy for a definitive answer
    async fn finish(
        &self,
        descriptor: &PlatformDescriptor,
        detection: Detection,
        provisional: Option<&DetectionResult>,
    ) -> DetectionResult {
        match detection {
            Detection::LoggedIn(result) => {
                let mut result = match provisional {
                    Some(cookie) => result.merge_profile(cookie),
                    None => result,
                };
                if self.settings.inline_avatars {
                    result = self.inline_avatar(descriptor, result).await;
                }

                let ttl = descriptor.detection.cache_ttl();
                if let Err(e) = self.cache.put(&descriptor.id, result.clone(), ttl).await {
                    warn!("Failed to cache login for {}: {}", descriptor.id, e);
                }
                info!(
                    "{} logged in as {}",
                    descriptor.id,
                    result.username.as_deref().unwrap_or("<unknown>")
                );
                result
            }
            Detection::LoggedOut(result) => {
                if let Err(e) = self.cache.invalidate(&descriptor.id).await {
                    warn!("Failed to clear cache for {}: {}", descriptor.id, e);
                }
                info!("{} logged out", descriptor.id);
                result
            }
            Detection::Inconclusive { reason } => DetectionResult::failed(reason),
        }
    }

    async fn inline_avatar(
        &self,
        descriptor: &PlatformDescriptor,
        mut result: DetectionResult,
    ) -> DetectionResult {
        if let Some(avatar) = result.avatar_ref.as_deref() {
            let referer = strategies::origin_of(&descriptor.entry_url);
            if let Some(inlined) = strategies::inline_avatar(
                self.fetcher.as_ref(),
                avatar,
                &referer,
                self.settings.api_timeout(),
            )
            .await
            {
                result.avatar_ref = Some(inlined);
            }
        }
        result
    }

    /// No strategy was definitive
    fn undecided(
        plan: &DetectionPlan,
        provisional: Option<DetectionResult>,
        reasons: Vec<String>,
        platform_id: &str,
    ) -> DetectionResult {
        if let Some(cookie) = provisional {
            if plan.assume_logged_in_with_cookie {
                debug!(
                    "{}: assuming login from session cookie ({})",
                    platform_id,
                    reasons.join("; ")
                );
                return DetectionResult::logged_in(cookie.username, None);
            }
        }

        let reason = if reasons.is_empty() {
            "no strategy was conclusive".to_string()
        } else {
            reasons.join("; ")
        };
        warn!("{}: detection inconclusive: {}", platform_id, reason);
        DetectionResult::failed(reason)
    }
}
