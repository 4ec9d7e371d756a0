//! Priority streaming loader and session pack
//!
//! Manifest categories are sorted into load tiers by an ordered rule list
//! (first match wins). A tier, or every matched category at once, is then
//! bulk-loaded through a bounded set of workers pulling from a shared queue.
//!
//! The all-tier pass is the *session pack*: it runs once per process and its
//! readiness is the gate the front end waits on. Failed items still count
//! toward progress so the gate always opens.

use crate::audio::asset_cache::{AssetCache, LoadFuture};
use crate::audio::backend::AudioDevice;
use crate::audio::manifest::SoundManifest;
use crate::audio::ManifestError;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Bulk-load tier, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Needed before the first frame of gameplay
    P0,
    /// Needed shortly after start
    P1,
    /// Nice to have early
    P2,
    /// Everything else
    P3,
}

/// How many of a category's candidates a tier load includes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplePolicy {
    /// Every candidate
    All,
    /// The first `n` candidates
    Count(usize),
}

impl SamplePolicy {
    fn bound(self, available: usize) -> usize {
        match self {
            Self::All => available,
            Self::Count(n) => n.min(available),
        }
    }
}

/// One ordered classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRule {
    /// Regex tested against the category path
    pub pattern: String,
    /// Tier assigned on match
    pub tier: Tier,
    /// Candidates included per matched category
    pub samples: SamplePolicy,
    /// Free-form note
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl PriorityRule {
    /// Build a rule
    pub fn new(pattern: &str, tier: Tier, samples: SamplePolicy) -> Self {
        Self {
            pattern: pattern.to_string(),
            tier,
            samples,
            description: String::new(),
        }
    }

    /// The shipped four-tier table
    ///
    /// Categories may carry a trailing `/sfx` leaf, so each anchored pattern
    /// accepts it optionally.
    pub fn default_rules() -> Vec<Self> {
        use SamplePolicy::{All, Count};
        use Tier::{P0, P1, P2, P3};
        vec![
            Self::new(r"^bgm/forest/(non_combat|combat)(/sfx)?$", P0, All),
            Self::new(r"^environment/forest/ambient_2d/forest_loop(/sfx)?$", P0, All),
            Self::new(r"^weapon/standard/fire(/sfx)?$", P0, Count(3)),
            Self::new(r"^weapon/standard/explosion(/sfx)?$", P0, Count(3)),
            Self::new(r"^weapon/standard/ground_hit_forest(/sfx)?$", P0, Count(3)),
            Self::new(r"^weapon/standard/reverb_forest_after_explosion(/sfx)?$", P0, Count(3)),
            Self::new(
                r"^vehicle/player_soviet/(idle_engine_loop|cruise/engine_loop|startup|shutdown|rise|rise_start)(/|$)",
                P0,
                All,
            ),
            Self::new(r"^bgm/", P1, All),
            Self::new(r"^environment/forest/ambient_2d/", P1, All),
            Self::new(
                r"^weapon/(armor_piercing_shell|he|incendiary|mortar|nuke|heavy_machine_gun|spg_mortar|torpedo|tracking_missile)/",
                P1,
                Count(1),
            ),
            Self::new(r"^weapon/standard/(hit_vehicle|flight_loop)(/sfx)?$", P1, Count(1)),
            Self::new(
                r"^vehicle/player_soviet/(boost|fall|shell_switch|aim_hold|cruise/(mechanical_loop|tire_forest_loop))(/|$)",
                P1,
                Count(1),
            ),
            Self::new(r"^vehicle/enemy_[^/]+/(idle_engine_loop|cruise|Fire)(/|$)", P1, Count(1)),
            Self::new(r"^vehicle/helicopter/", P1, Count(1)),
            Self::new(r"^environment/forest/point_3d/creatures/", P2, Count(1)),
            Self::new(r"^environment/forest/point_3d/static/", P2, Count(1)),
            Self::new(r"^infantry/", P2, Count(1)),
            Self::new(r"^vehicle/enemy_[^/]+/cookoff(/|$)", P2, Count(1)),
            Self::new(r"^vehicle/(Lake_fall|land_submarine)(/|$)", P2, Count(1)),
            Self::new(r".*", P3, Count(0)),
        ]
    }
}

/// Compiled, ordered priority rules
#[derive(Debug, Clone)]
pub struct PriorityTable {
    rules: Vec<(Regex, PriorityRule)>,
}

impl PriorityTable {
    /// Compile rules, failing on the first invalid pattern
    pub fn new(rules: &[PriorityRule]) -> Result<Self, ManifestError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| (regex, rule.clone()))
                    .map_err(|source| ManifestError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First rule matching the category
    pub fn classify(&self, category: &str) -> Option<&PriorityRule> {
        self.rules
            .iter()
            .find(|(regex, _)| regex.is_match(category))
            .map(|(_, rule)| rule)
    }

    /// Sources a tier load (or the all-tier pass for `None`) covers
    ///
    /// Ids are deduplicated across categories in manifest order.
    pub fn sources_for(&self, manifest: &SoundManifest, tier: Option<Tier>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (category, sources) in manifest.categories() {
            let Some(rule) = self.classify(category) else {
                continue;
            };
            if tier.is_some_and(|tier| tier != rule.tier) {
                continue;
            }
            let count = rule.samples.bound(sources.len());
            for source in &sources[..count] {
                if seen.insert(source.as_str()) {
                    out.push(source.clone());
                }
            }
        }
        out
    }
}

fn background_score(category: &str) -> u32 {
    let mut score = 0;
    let wrapped = format!("{category}/");
    if category.starts_with("weapon/") {
        score += 12;
    }
    for (segment, weight) in [
        ("/fire/", 8),
        ("/explosion/", 10),
        ("/ground_hit_forest/", 8),
        ("/hit_vehicle/", 8),
        ("/reverb_forest_after_explosion/", 10),
        ("/flight_loop/", 6),
    ] {
        if wrapped.contains(segment) {
            score += weight;
        }
    }
    if category.starts_with("vehicle/") {
        score += 6;
    }
    if category.starts_with("environment/forest/ambient_2d/") {
        score += 4;
    }
    if category.starts_with("bgm/") {
        score += 5;
    }
    if wrapped.contains("/menu/") {
        score += 2;
    }
    score
}

/// Sources worth warming in the background, loudest gameplay roles first
pub fn background_candidates(manifest: &SoundManifest, max_total: usize) -> Vec<String> {
    let mut entries: Vec<(u32, &str, &[String])> = manifest
        .categories()
        .map(|(category, sources)| (background_score(category), category, sources))
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (_, _, sources) in entries {
        for source in sources {
            if out.len() >= max_total {
                return out;
            }
            if seen.insert(source.as_str()) {
                out.push(source.clone());
            }
        }
    }
    out
}

/// Progress callback: `(loaded, total)`
pub type ProgressListener = Box<dyn FnMut(usize, usize) + Send>;

/// Completion of a bulk load
pub type PackFuture = Shared<BoxFuture<'static, ()>>;

fn completed() -> PackFuture {
    future::ready(()).boxed().shared()
}

/// Process-wide session pack state
///
/// Listeners run while the pack is locked and must not call back into it.
#[derive(Default)]
pub struct SessionPack {
    ready: bool,
    total: usize,
    loaded: usize,
    listeners: Vec<(u64, ProgressListener)>,
    next_listener_id: u64,
    completion: Option<PackFuture>,
    release_on_ready: Vec<u64>,
}

/// Shared handle to a session pack
pub type SharedSessionPack = Arc<Mutex<SessionPack>>;

static GLOBAL_PACK: OnceLock<SharedSessionPack> = OnceLock::new();

/// Lock a pack, recovering from a poisoned listener panic
pub fn lock_pack(pack: &SharedSessionPack) -> MutexGuard<'_, SessionPack> {
    pack.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionPack {
    /// Fresh, unshared pack
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh pack behind a shared handle
    pub fn shared() -> SharedSessionPack {
        Arc::new(Mutex::new(Self::new()))
    }

    /// The process-wide pack, created on first access
    pub fn global() -> SharedSessionPack {
        Arc::clone(GLOBAL_PACK.get_or_init(Self::shared))
    }

    /// Whether the one-time pass has finished
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// `(loaded, total)` of the one-time pass
    pub fn progress(&self) -> (usize, usize) {
        (self.loaded, self.total)
    }

    /// Register a listener, replaying the current totals to it first
    pub fn subscribe(&mut self, mut listener: ProgressListener) -> u64 {
        listener(self.loaded, self.total);
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener
    pub fn unsubscribe(&mut self, id: u64) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&mut self, loaded: usize, total: usize) {
        for (_, listener) in &mut self.listeners {
            listener(loaded, total);
        }
    }

    fn mark_ready(&mut self) {
        self.ready = true;
        for id in std::mem::take(&mut self.release_on_ready) {
            self.unsubscribe(id);
        }
    }

    /// Forget all progress and listeners
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Handle returned by a progress subscription
#[must_use = "dropping the subscription keeps the listener registered; call `unsubscribe` to remove it"]
pub struct ProgressSubscription {
    pack: SharedSessionPack,
    id: u64,
}

impl ProgressSubscription {
    /// Subscribe to a pack's progress
    pub fn new(pack: &SharedSessionPack, listener: ProgressListener) -> Self {
        let id = lock_pack(pack).subscribe(listener);
        Self {
            pack: Arc::clone(pack),
            id,
        }
    }

    /// Stop receiving progress
    pub fn unsubscribe(self) {
        lock_pack(&self.pack).unsubscribe(self.id);
    }
}

/// Arguments of a bulk load request
#[derive(Default)]
pub struct PackRequest {
    /// Load only this tier; `None` runs the one-time session pass
    pub tier: Option<Tier>,
    /// Parallel workers, clamped to `1..=10`
    pub concurrency: Option<usize>,
    /// Progress callback
    pub on_progress: Option<ProgressListener>,
}

impl PackRequest {
    /// Request for one tier
    pub fn tier(tier: Tier) -> Self {
        Self {
            tier: Some(tier),
            ..Self::default()
        }
    }

    /// Request for the session pass
    pub fn session() -> Self {
        Self::default()
    }

    /// Set the worker count
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Set the progress callback
    pub fn with_progress(mut self, listener: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(listener));
        self
    }
}

enum JobReporter {
    Tier {
        tier: Tier,
        on_progress: Option<ProgressListener>,
    },
    Session {
        pack: SharedSessionPack,
    },
}

struct BulkLoadJob {
    reporter: JobReporter,
    queue: VecDeque<String>,
    in_flight: Vec<LoadFuture>,
    workers: usize,
    loaded: usize,
    total: usize,
    done: Option<oneshot::Sender<()>>,
}

impl BulkLoadJob {
    fn report(&mut self) {
        match &mut self.reporter {
            JobReporter::Tier { on_progress, .. } => {
                if let Some(listener) = on_progress {
                    listener(self.loaded, self.total);
                }
            }
            JobReporter::Session { pack } => {
                let mut pack = lock_pack(pack);
                pack.loaded = self.loaded;
                pack.emit(self.loaded, self.total);
            }
        }
    }

    /// Harvest settled loads and refill workers; returns `true` once finished
    fn pump(&mut self, cache: &mut AssetCache, device: &mut dyn AudioDevice) -> bool {
        loop {
            let mut harvested = false;
            let mut index = 0;
            while index < self.in_flight.len() {
                match self.in_flight[index].clone().now_or_never() {
                    Some(result) => {
                        self.in_flight.swap_remove(index);
                        if let Err(e) = result {
                            log::warn!("Bulk audio load item failed: {e}");
                        }
                        self.loaded += 1;
                        harvested = true;
                        self.report();
                    }
                    None => index += 1,
                }
            }

            while !cache.is_destroyed() && self.in_flight.len() < self.workers {
                let Some(source_id) = self.queue.pop_front() else {
                    break;
                };
                self.in_flight.push(cache.ensure_loaded(device, &source_id));
            }

            if !harvested {
                break;
            }
        }

        self.in_flight.is_empty() && (self.queue.is_empty() || cache.is_destroyed())
    }

    fn finish(&mut self) {
        match &self.reporter {
            JobReporter::Tier { tier, .. } => {
                log::info!("Audio tier {tier:?} loading completed: {}/{}", self.loaded, self.total);
            }
            JobReporter::Session { pack } => {
                let mut pack = lock_pack(pack);
                pack.emit(self.total, self.total);
                pack.mark_ready();
                log::info!("Session audio pack ready: {}/{}", self.loaded, self.total);
            }
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Runs tier and session loads, advanced once per frame
#[derive(Default)]
pub struct BulkLoader {
    jobs: Vec<BulkLoadJob>,
}

impl BulkLoader {
    /// Create an idle loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs still running
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Start a tier or session load
    pub fn start(
        &mut self,
        request: PackRequest,
        table: &PriorityTable,
        manifest: &SoundManifest,
        pack: &SharedSessionPack,
        default_concurrency: usize,
        cache: &mut AssetCache,
        device: &mut dyn AudioDevice,
    ) -> PackFuture {
        let workers = request.concurrency.unwrap_or(default_concurrency).clamp(1, 10);

        if let Some(tier) = request.tier {
            let sources = table.sources_for(manifest, Some(tier));
            let total = sources.len();
            let mut on_progress = request.on_progress;
            log::info!("Audio tier {tier:?} loading: {total} files");
            if total == 0 {
                log::warn!("No audio files matched tier {tier:?}");
                if let Some(listener) = on_progress.as_mut() {
                    listener(0, 0);
                }
                return completed();
            }
            if let Some(listener) = on_progress.as_mut() {
                listener(0, total);
            }
            return self.spawn(
                JobReporter::Tier { tier, on_progress },
                sources,
                workers,
                cache,
                device,
            );
        }

        let mut guard = lock_pack(pack);
        if guard.ready {
            let total = guard.total.max(guard.loaded);
            drop(guard);
            if let Some(mut listener) = request.on_progress {
                listener(total, total);
            }
            return completed();
        }

        if let Some(listener) = request.on_progress {
            let id = guard.subscribe(listener);
            guard.release_on_ready.push(id);
        }

        if let Some(completion) = &guard.completion {
            return completion.clone();
        }

        let sources = table.sources_for(manifest, None);
        let total = sources.len();
        guard.total = total;
        guard.loaded = 0;
        log::info!("Session audio pack loading: {total} files");

        if total == 0 {
            // Every listener was handed (0, 0) when it subscribed
            guard.mark_ready();
            let done = completed();
            guard.completion = Some(done.clone());
            return done;
        }
        guard.emit(0, total);
        drop(guard);

        let completion = self.spawn(
            JobReporter::Session { pack: Arc::clone(pack) },
            sources,
            workers,
            cache,
            device,
        );
        lock_pack(pack).completion = Some(completion.clone());
        completion
    }

    fn spawn(
        &mut self,
        reporter: JobReporter,
        sources: Vec<String>,
        workers: usize,
        cache: &mut AssetCache,
        device: &mut dyn AudioDevice,
    ) -> PackFuture {
        let (sender, receiver) = oneshot::channel();
        let completion = receiver.map(|_| ()).boxed().shared();
        let total = sources.len();
        let mut job = BulkLoadJob {
            reporter,
            queue: sources.into(),
            in_flight: Vec::new(),
            workers: workers.min(total),
            loaded: 0,
            total,
            done: Some(sender),
        };
        if job.pump(cache, device) {
            job.finish();
        } else {
            self.jobs.push(job);
        }
        completion
    }

    /// Advance every job; call after the cache has seen this frame's events
    pub fn pump(&mut self, cache: &mut AssetCache, device: &mut dyn AudioDevice) {
        let mut index = 0;
        while index < self.jobs.len() {
            if self.jobs[index].pump(cache, device) {
                let mut job = self.jobs.swap_remove(index);
                job.finish();
            } else {
                index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::asset_cache::StreamingConfig;
    use crate::audio::backend::mock_backend::MockDevice;
    use std::sync::mpsc;

    fn manifest() -> SoundManifest {
        SoundManifest::from_map([
            ("weapon/standard/fire", vec!["f1", "f2", "f3", "f4"]),
            ("weapon/standard/explosion", vec!["e1", "e2"]),
            ("bgm/forest/combat", vec!["m1", "m2"]),
            ("bgm/menu", vec!["menu1"]),
            ("weapon/he/fire", vec!["he1", "he2"]),
            ("weapon/standard/hit_vehicle", vec!["f1", "hv1"]),
            ("infantry/shout", vec!["i1", "i2"]),
            ("ui/click", vec!["c1"]),
        ])
    }

    fn table() -> PriorityTable {
        PriorityTable::new(&PriorityRule::default_rules()).unwrap()
    }

    struct Rig {
        device: MockDevice,
        cache: AssetCache,
        loader: BulkLoader,
        pack: SharedSessionPack,
    }

    impl Rig {
        fn new() -> Self {
            let mut device = MockDevice::new();
            device.set_manual_decode(true);
            Self {
                device,
                cache: AssetCache::new(StreamingConfig::default()),
                loader: BulkLoader::new(),
                pack: SessionPack::shared(),
            }
        }

        fn start(&mut self, request: PackRequest) -> PackFuture {
            self.loader.start(
                request,
                &table(),
                &manifest(),
                &self.pack,
                5,
                &mut self.cache,
                &mut self.device,
            )
        }

        fn frame(&mut self) {
            self.device.complete_decodes();
            for event in self.device.poll_events() {
                self.cache.handle_event(&event);
            }
            self.loader.pump(&mut self.cache, &mut self.device);
        }
    }

    fn recorder() -> (ProgressListener, mpsc::Receiver<(usize, usize)>) {
        let (tx, rx) = mpsc::channel();
        let listener: ProgressListener = Box::new(move |loaded, total| {
            let _ = tx.send((loaded, total));
        });
        (listener, rx)
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = table();
        assert_eq!(table.classify("weapon/standard/fire").map(|r| r.tier), Some(Tier::P0));
        assert_eq!(table.classify("bgm/forest/combat/sfx").map(|r| r.tier), Some(Tier::P0));
        assert_eq!(table.classify("bgm/menu").map(|r| r.tier), Some(Tier::P1));
        assert_eq!(table.classify("ui/click").map(|r| r.tier), Some(Tier::P3));
    }

    #[test]
    fn test_tier_partition_and_sample_bound() {
        let table = table();
        let manifest = manifest();
        let p0 = table.sources_for(&manifest, Some(Tier::P0));
        // bgm/forest/combat: all 2, explosion: 2 of Count(3), fire: first 3
        assert_eq!(p0.len(), 2 + 2 + 3);
        assert!(p0.contains(&"f3".to_string()));
        assert!(!p0.contains(&"f4".to_string()));

        let p1 = table.sources_for(&manifest, Some(Tier::P1));
        // bgm/menu all, he first 1, hit_vehicle first 1 ("f1") is a new id within P1
        assert_eq!(p1, vec!["menu1", "he1", "f1"]);

        let p3 = table.sources_for(&manifest, Some(Tier::P3));
        assert!(p3.is_empty());

        let all = table.sources_for(&manifest, None);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len(), "ids deduplicated across categories");
    }

    #[test]
    fn test_invalid_pattern() {
        let result = PriorityTable::new(&[PriorityRule::new("(", Tier::P0, SamplePolicy::All)]);
        assert!(matches!(result, Err(ManifestError::InvalidPattern { .. })));
    }

    #[test]
    fn test_tier_load_reports_progress() {
        let mut rig = Rig::new();
        let (listener, rx) = recorder();
        let done = rig.start(PackRequest {
            tier: Some(Tier::P0),
            concurrency: Some(2),
            on_progress: Some(listener),
        });
        assert_eq!(rig.device.total_decode_requests(), 2);
        assert!(done.clone().now_or_never().is_none());

        for _ in 0..10 {
            rig.frame();
        }
        assert!(done.now_or_never().is_some());
        let updates: Vec<_> = rx.try_iter().collect();
        assert_eq!(updates.first(), Some(&(0, 7)));
        assert_eq!(updates.last(), Some(&(7, 7)));
        assert_eq!(updates.len(), 8);
        assert!(!lock_pack(&rig.pack).is_ready(), "tier loads do not open the gate");
    }

    #[test]
    fn test_empty_tier_reports_zero() {
        let mut rig = Rig::new();
        let (listener, rx) = recorder();
        let done = rig.start(PackRequest {
            tier: Some(Tier::P3),
            concurrency: None,
            on_progress: Some(listener),
        });
        assert!(done.now_or_never().is_some());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![(0, 0)]);
    }

    #[test]
    fn test_failures_count_toward_progress() {
        let mut rig = Rig::new();
        rig.device.fail_source("f1");
        rig.device.fail_source("e1");
        let done = rig.start(PackRequest::tier(Tier::P0).with_concurrency(10));
        rig.frame();
        assert!(done.now_or_never().is_some());
    }

    #[test]
    fn test_session_pack_runs_once() {
        let mut rig = Rig::new();
        let (listener, rx) = recorder();
        let first = rig.start(PackRequest {
            tier: None,
            concurrency: Some(3),
            on_progress: Some(listener),
        });
        let requests_after_start = rig.device.total_decode_requests();
        let second = rig.start(PackRequest::session());
        assert_eq!(rig.device.total_decode_requests(), requests_after_start);
        assert_eq!(rig.loader.active_jobs(), 1);

        for _ in 0..10 {
            rig.frame();
        }
        assert!(first.now_or_never().is_some());
        assert!(second.now_or_never().is_some());
        assert!(lock_pack(&rig.pack).is_ready());

        let updates: Vec<_> = rx.try_iter().collect();
        let total = table().sources_for(&manifest(), None).len();
        assert_eq!(updates.first(), Some(&(0, 0)), "replay on subscribe");
        assert_eq!(updates.last(), Some(&(total, total)));
        assert_eq!(lock_pack(&rig.pack).listener_count(), 0, "request listener released");

        let (late, late_rx) = recorder();
        let again = rig.start(PackRequest {
            tier: None,
            concurrency: None,
            on_progress: Some(late),
        });
        assert!(again.now_or_never().is_some());
        assert_eq!(late_rx.try_iter().collect::<Vec<_>>(), vec![(total, total)]);
    }

    #[test]
    fn test_empty_session_pack_reports_once() {
        let mut rig = Rig::new();
        let (listener, rx) = recorder();
        let done = rig.loader.start(
            PackRequest {
                tier: None,
                concurrency: None,
                on_progress: Some(listener),
            },
            &table(),
            &SoundManifest::default(),
            &rig.pack,
            5,
            &mut rig.cache,
            &mut rig.device,
        );
        assert!(done.now_or_never().is_some());
        assert!(lock_pack(&rig.pack).is_ready());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![(0, 0)]);
    }

    #[test]
    fn test_subscription_replays_and_unsubscribes() {
        let mut rig = Rig::new();
        let (listener, rx) = recorder();
        let subscription = ProgressSubscription::new(&rig.pack, listener);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![(0, 0)]);

        let _done = rig.start(PackRequest::session());
        rig.frame();
        assert!(rx.try_iter().count() > 0);

        subscription.unsubscribe();
        for _ in 0..10 {
            rig.frame();
        }
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_destroyed_cache_finishes_session() {
        let mut rig = Rig::new();
        let done = rig.start(PackRequest::session().with_concurrency(1));
        rig.cache.destroy();
        rig.loader.pump(&mut rig.cache, &mut rig.device);
        assert!(done.now_or_never().is_some());
        assert!(lock_pack(&rig.pack).is_ready());
    }

    #[test]
    fn test_background_candidates_ordering() {
        let manifest = manifest();
        let picks = background_candidates(&manifest, 4);
        assert_eq!(picks.len(), 4);
        // weapon/standard/explosion scores 12 + 10 and leads
        assert_eq!(&picks[..2], &["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn test_background_score() {
        assert_eq!(background_score("weapon/standard/fire"), 20);
        assert_eq!(background_score("vehicle/enemy_tank/cookoff"), 6);
        assert_eq!(background_score("bgm/menu"), 7);
        assert_eq!(background_score("ui/click"), 0);
    }
}
