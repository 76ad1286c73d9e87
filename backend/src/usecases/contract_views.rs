use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use application::usecases::{
    contract_view::{ContractServices, ContractView},
    status_reconciler::ReconcileError,
};
use domain::repositories::{
    envelope_status::EnvelopeStatusSource, signing_provider::SigningProvider,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};
use url::Url;

struct MountedView<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    view: Arc<ContractView<S, E>>,
    last_used: Instant,
}

/// Open contract views keyed by booking. A booking has at most one live view;
/// opening it again reuses the mounted one. Views unused for longer than the
/// idle ttl are torn down.
pub struct ContractViewRegistry<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    services: ContractServices<S, E>,
    views: Mutex<HashMap<i64, MountedView<S, E>>>,
    view_base_url: Url,
    idle_ttl: Duration,
}

impl<S, E> ContractViewRegistry<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub fn new(services: ContractServices<S, E>, view_base_url: Url, idle_ttl: Duration) -> Self {
        Self {
            services,
            views: Mutex::new(HashMap::new()),
            view_base_url,
            idle_ttl,
        }
    }

    /// Returns the mounted view, mounting one first when needed. A booking the
    /// booking service does not know is never kept.
    pub async fn open(&self, booking_id: i64) -> Result<Arc<ContractView<S, E>>, ReconcileError> {
        self.evict_idle().await;

        if let Some(view) = self.mounted(booking_id).await {
            return Ok(view);
        }

        let view = ContractView::mount(booking_id, self.services.clone()).await;
        if view.booking_missing() {
            view.teardown().await;
            info!(booking_id, "contract_views: unknown booking, view released");
            return Err(ReconcileError::BookingNotFound(booking_id));
        }

        let mut views = self.views.lock().await;
        match views.get_mut(&booking_id) {
            Some(existing) if existing.view.is_active() => {
                // Lost a race with another mount; keep the first one.
                existing.last_used = Instant::now();
                let existing = Arc::clone(&existing.view);
                drop(views);
                debug!(booking_id, "contract_views: duplicate mount released");
                view.teardown().await;
                Ok(existing)
            }
            _ => {
                views.insert(
                    booking_id,
                    MountedView {
                        view: Arc::clone(&view),
                        last_used: Instant::now(),
                    },
                );
                Ok(view)
            }
        }
    }

    pub async fn mounted(&self, booking_id: i64) -> Option<Arc<ContractView<S, E>>> {
        let mut views = self.views.lock().await;
        let mounted = views
            .get_mut(&booking_id)
            .filter(|mounted| mounted.view.is_active())?;
        mounted.last_used = Instant::now();
        Some(Arc::clone(&mounted.view))
    }

    /// Tears the view down. Returns `false` when nothing was open.
    pub async fn close(&self, booking_id: i64) -> bool {
        let mounted = self.views.lock().await.remove(&booking_id);
        match mounted {
            Some(mounted) => {
                mounted.view.teardown().await;
                info!(booking_id, "contract_views: view closed");
                true
            }
            None => false,
        }
    }

    /// Tears down views that are inactive or idle past the ttl. Returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let expired: Vec<(i64, Arc<ContractView<S, E>>)> = {
            let mut views = self.views.lock().await;
            let now = Instant::now();
            let ids: Vec<i64> = views
                .iter()
                .filter(|(_, mounted)| {
                    !mounted.view.is_active()
                        || now.duration_since(mounted.last_used) >= self.idle_ttl
                })
                .map(|(booking_id, _)| *booking_id)
                .collect();

            ids.into_iter()
                .filter_map(|booking_id| {
                    views
                        .remove(&booking_id)
                        .map(|mounted| (booking_id, mounted.view))
                })
                .collect()
        };

        for (booking_id, view) in &expired {
            view.teardown().await;
            debug!(booking_id = *booking_id, "contract_views: idle view evicted");
        }
        if !expired.is_empty() {
            info!(
                evicted = expired.len(),
                "contract_views: idle views evicted"
            );
        }

        expired.len()
    }

    /// Periodically evicts idle views for as long as the registry is alive.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_idle().await;
            }
        })
    }

    pub async fn open_count(&self) -> usize {
        self.views.lock().await.len()
    }

    pub fn default_return_url(&self, booking_id: i64) -> String {
        format!(
            "{}/bookings/{booking_id}/contract",
            self.view_base_url.as_str().trim_end_matches('/')
        )
    }
}
