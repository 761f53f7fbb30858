//! Path reconciliation between the remote lease set and the media server.
//!
//! One reconciliation runs at a time: the tick loop skips (never queues) a
//! tick that fires while a sync is still in flight. Scheduling lives here;
//! the diff itself is a pure function so it can be exercised directly.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    lease::{Lease, LeaseClient},
    media::{MediaClient, PathConfig},
    persist, Result,
};

/// One tick's worth of changes. Creates and replaces are applied before
/// removes so a renamed lease never leaves its path briefly absent.
#[derive(Debug, Default, PartialEq)]
pub struct SyncPlan {
    pub create: Vec<PathConfig>,
    pub replace: Vec<PathConfig>,
    pub remove: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.replace.is_empty() && self.remove.is_empty()
    }
}

/// Diff the lease set against the live path set.
///
/// `marks` records when a live path was first seen without a backing lease;
/// a path is only removed once it has stayed unleased past `grace`, and a
/// lease that reappears clears its marker. HLS-backed leases are served by
/// this sidecar directly and are neither created nor removed here.
pub fn plan(
    leases: &HashMap<String, Lease>,
    existing: &HashMap<String, PathConfig>,
    marks: &mut HashMap<String, Instant>,
    grace: Duration,
    now: Instant,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (name, lease) in leases {
        if lease.is_hls() {
            continue;
        }

        let derived = PathConfig::from_lease(lease);
        match existing.get(name) {
            None => plan.create.push(derived),
            Some(live) if derived.differs_from(live) => plan.replace.push(derived),
            Some(_) => {}
        }
    }

    for name in existing.keys() {
        if leases.contains_key(name) {
            marks.remove(name);
            continue;
        }

        match marks.get(name) {
            Some(marked) if now.duration_since(*marked) >= grace => {
                plan.remove.push(name.clone());
                marks.remove(name);
            }
            Some(_) => {}
            None => {
                marks.insert(name.clone(), now);
            }
        }
    }

    // Drop markers for paths that disappeared out from under us.
    marks.retain(|name, _| existing.contains_key(name) || leases.contains_key(name));

    plan.create.sort_by(|a, b| a.name.cmp(&b.name));
    plan.replace.sort_by(|a, b| a.name.cmp(&b.name));
    plan.remove.sort();
    plan
}

pub struct Reconciler {
    config: Arc<Config>,
    leases: LeaseClient,
    media: MediaClient,
    in_progress: AtomicBool,
    cleanup_marks: Mutex<HashMap<String, Instant>>,
}

impl Reconciler {
    pub fn new(config: Arc<Config>) -> Self {
        let leases = LeaseClient::new(
            config.api_url.clone(),
            config.lease_endpoint.clone(),
            config.signing_secret.clone(),
        );
        let media = MediaClient::new(config.media_api_url.clone(), config.media_secret.clone());

        Self {
            config,
            leases,
            media,
            in_progress: AtomicBool::new(false),
            cleanup_marks: Mutex::new(HashMap::new()),
        }
    }

    /// Recurring tick loop. Spawned once at startup and runs for the life
    /// of the process; a failed tick logs and waits for the next one.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(err) = self.try_sync().await {
                error!("sync failed: {}", err);
            }
        }
    }

    /// Run one reconciliation unless one is already in flight.
    pub async fn try_sync(&self) -> Result<()> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            warn!("sync already in progress, skipping");
            return Ok(());
        }

        let result = self.sync().await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    /// One full diff-and-apply cycle. Callable directly; scheduling and
    /// overlap control live in [`run`](Self::run) and
    /// [`try_sync`](Self::try_sync).
    pub async fn sync(&self) -> Result<()> {
        let leases = self.leases.list().await?;

        match self.config.media_config_path.clone() {
            Some(path) => self.sync_config_file(&path, &leases),
            None => self.sync_api(&leases).await,
        }
    }

    async fn sync_api(&self, leases: &HashMap<String, Lease>) -> Result<()> {
        let existing = self.media.list_paths().await?;
        let plan = self.plan_locked(leases, &existing);

        if plan.is_empty() {
            return Ok(());
        }

        info!(
            create = plan.create.len(),
            replace = plan.replace.len(),
            remove = plan.remove.len(),
            "applying path changes"
        );

        for path in &plan.create {
            self.media.create_path(path).await?;
        }
        for path in &plan.replace {
            self.media.replace_path(path).await?;
        }
        for name in &plan.remove {
            self.media.delete_path(name).await?;
        }

        Ok(())
    }

    fn sync_config_file(&self, path: &std::path::Path, leases: &HashMap<String, Lease>) -> Result<()> {
        let current = persist::read_document(path)?;
        let existing = persist::parse_paths(&current)?;
        let plan = self.plan_locked(leases, &existing);

        let mut desired = existing;
        for config in plan.create.into_iter().chain(plan.replace) {
            desired.insert(config.name.clone(), config);
        }
        for name in &plan.remove {
            desired.remove(name);
        }

        let auth_address = format!(
            "{}/api/video/auth",
            self.config.api_url.as_str().trim_end_matches('/')
        );
        let paths: Vec<PathConfig> = desired.into_values().collect();
        let document = persist::desired_document(&current, &auth_address, &paths)?;

        if persist::structurally_equal(&current, &document) {
            return Ok(());
        }

        persist::write_atomic(path, &persist::render(&document)?)?;
        info!(paths = paths.len(), "media server config rewritten");
        Ok(())
    }

    fn plan_locked(
        &self,
        leases: &HashMap<String, Lease>,
        existing: &HashMap<String, PathConfig>,
    ) -> SyncPlan {
        let mut marks = self.cleanup_marks.lock().unwrap();
        plan(
            leases,
            existing,
            &mut marks,
            self.config.cleanup_grace,
            Instant::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(300);

    fn lease(path: &str, proxy: Option<&str>, recording: bool) -> (String, Lease) {
        (
            path.to_string(),
            Lease {
                id: 1,
                path: path.to_string(),
                recording,
                proxy: proxy.map(String::from),
            },
        )
    }

    fn apply(plan: &SyncPlan, existing: &mut HashMap<String, PathConfig>) {
        for path in plan.create.iter().chain(plan.replace.iter()) {
            existing.insert(path.name.clone(), path.clone());
        }
        for name in &plan.remove {
            existing.remove(name);
        }
    }

    #[test]
    fn test_new_lease_without_proxy_creates_bare_path() {
        let leases = HashMap::from([lease("p1", None, false)]);
        let mut marks = HashMap::new();

        let plan = plan(&leases, &HashMap::new(), &mut marks, GRACE, Instant::now());

        assert_eq!(plan.create.len(), 1);
        assert_eq!(plan.create[0].name, "p1");
        assert!(plan.create[0].source.is_none());
        assert!(plan.create[0].source_on_demand.is_none());
        assert!(plan.replace.is_empty());
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_plan_is_idempotent() {
        let leases = HashMap::from([
            lease("p1", None, true),
            lease("p2", Some("rtmp://cdn.example.com/live"), false),
        ]);
        let mut existing = HashMap::new();
        let mut marks = HashMap::new();
        let now = Instant::now();

        let first = plan(&leases, &existing, &mut marks, GRACE, now);
        assert_eq!(first.create.len(), 2);
        apply(&first, &mut existing);

        let second = plan(&leases, &existing, &mut marks, GRACE, now);
        assert!(second.is_empty());
    }

    #[test]
    fn test_changed_lease_is_replaced() {
        let (_, original) = lease("p1", Some("rtmp://a"), false);
        let mut existing =
            HashMap::from([("p1".to_string(), PathConfig::from_lease(&original))]);
        let leases = HashMap::from([lease("p1", Some("rtmp://b"), false)]);
        let mut marks = HashMap::new();

        let plan = plan(&leases, &existing, &mut marks, GRACE, Instant::now());
        assert!(plan.create.is_empty());
        assert_eq!(plan.replace.len(), 1);
        assert_eq!(plan.replace[0].source.as_deref(), Some("rtmp://b"));

        apply(&plan, &mut existing);
        let mut marks = HashMap::new();
        assert!(super::plan(&leases, &existing, &mut marks, GRACE, Instant::now()).is_empty());
    }

    #[test]
    fn test_unleased_path_survives_grace_period_then_removed_once() {
        let leases = HashMap::new();
        let existing = HashMap::from([(
            "stale".to_string(),
            PathConfig {
                name: "stale".to_string(),
                record: false,
                source: None,
                source_on_demand: None,
            },
        )]);
        let mut marks = HashMap::new();
        let start = Instant::now();

        // First sighting only marks.
        let first = plan(&leases, &existing, &mut marks, GRACE, start);
        assert!(first.remove.is_empty());
        assert!(marks.contains_key("stale"));

        // Still inside the grace period.
        let second = plan(&leases, &existing, &mut marks, GRACE, start + GRACE / 2);
        assert!(second.remove.is_empty());

        // Past the grace period: removed exactly once, marker cleared.
        let third = plan(&leases, &existing, &mut marks, GRACE, start + GRACE);
        assert_eq!(third.remove, vec!["stale".to_string()]);
        assert!(marks.is_empty());
    }

    #[test]
    fn test_reappearing_lease_clears_cleanup_marker() {
        let existing = HashMap::from([(
            "p1".to_string(),
            PathConfig {
                name: "p1".to_string(),
                record: false,
                source: None,
                source_on_demand: None,
            },
        )]);
        let mut marks = HashMap::new();
        let start = Instant::now();

        plan(&HashMap::new(), &existing, &mut marks, GRACE, start);
        assert!(marks.contains_key("p1"));

        // Lease comes back before the grace period expires.
        let leases = HashMap::from([lease("p1", None, false)]);
        let again = plan(&leases, &existing, &mut marks, GRACE, start + GRACE / 2);
        assert!(again.is_empty());
        assert!(marks.is_empty());

        // Even well past the original grace horizon, nothing is removed.
        let later = plan(&HashMap::new(), &existing, &mut marks, GRACE, start + GRACE * 2);
        assert!(later.remove.is_empty());
    }

    #[test]
    fn test_hls_leases_are_left_alone() {
        let leases = HashMap::from([lease(
            "hls1",
            Some("https://cdn.example.com/live/index.m3u8"),
            false,
        )]);
        let mut marks = HashMap::new();

        // Not created...
        let created = plan(&leases, &HashMap::new(), &mut marks, GRACE, Instant::now());
        assert!(created.is_empty());

        // ...and an existing path backed by an HLS lease is not removed.
        let existing = HashMap::from([(
            "hls1".to_string(),
            PathConfig {
                name: "hls1".to_string(),
                record: false,
                source: None,
                source_on_demand: None,
            },
        )]);
        let kept = plan(&leases, &existing, &mut marks, GRACE, Instant::now());
        assert!(kept.is_empty());
        assert!(marks.is_empty());
    }
}
