//! Located weather fetch: location gate, permission, one-shot fix, fetch, cache.
//!
//! A run moves through [`FlowState`]s and ends in exactly one [`FlowOutcome`].
//! Each run owns its own [`FlowRun`]; only one run may be active at a time.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cache::WeatherCache,
    connectivity::is_network_available,
    location::{LocationRequest, is_location_enabled},
    model::{Coordinates, WeatherResponse},
    platform::{LOCATION_PERMISSIONS, Notice, Platform, SettingsPage},
    provider::{FetchError, WeatherProvider},
};

/// What started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// App start: cached data short-circuits location acquisition.
    Startup,
    /// Manual refresh: always acquires a new fix.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowState {
    Idle,
    PermissionPending,
    Acquiring,
    Resolved(Coordinates),
    PermissionDenied,
    LocationDisabled,
    TimedOut,
    /// The location service reported an error instead of a fix.
    LocationFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    LocationDisabled,
    PermissionDenied,
    /// Startup found cached data; nothing was fetched.
    CachedDataPresent,
    LocationTimedOut,
    LocationUnavailable(String),
    NoConnectivity,
    FetchFailed(FetchError),
    Updated(WeatherResponse),
    /// Another run was in flight.
    AlreadyRunning,
}

/// Per-run state.
#[derive(Debug, Clone)]
pub struct FlowRun {
    pub trigger: Trigger,
    pub states: Vec<FlowState>,
}

impl FlowRun {
    fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            states: vec![FlowState::Idle],
        }
    }

    fn enter(&mut self, state: FlowState) {
        debug!(from = ?self.state(), to = ?state, "Flow transition");
        self.states.push(state);
    }

    pub fn state(&self) -> FlowState {
        self.states.last().copied().unwrap_or(FlowState::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct FlowReport {
    pub outcome: FlowOutcome,
    pub run: FlowRun,
}

#[derive(Debug)]
pub struct WeatherFlow {
    provider: Arc<dyn WeatherProvider>,
    cache: WeatherCache,
    platform: Platform,
    location_timeout: Duration,
    in_flight: Mutex<()>,
}

impl WeatherFlow {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        cache: WeatherCache,
        platform: Platform,
        location_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            platform,
            location_timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    #[instrument(skip(self))]
    pub async fn run(&self, trigger: Trigger) -> FlowReport {
        let mut run = FlowRun::new(trigger);

        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("A weather update is already in progress");
            return FlowReport {
                outcome: FlowOutcome::AlreadyRunning,
                run,
            };
        };

        let outcome = self.drive(&mut run).await;
        info!(
            ?outcome,
            final_state = ?run.state(),
            "Weather flow finished"
        );

        FlowReport { outcome, run }
    }

    async fn drive(&self, run: &mut FlowRun) -> FlowOutcome {
        let platform = &self.platform;

        if !is_location_enabled(platform.location.as_ref()) {
            run.enter(FlowState::LocationDisabled);
            platform.notifier.notify(Notice::LocationDisabled);
            platform.settings.open(SettingsPage::Location);
            return FlowOutcome::LocationDisabled;
        }

        run.enter(FlowState::PermissionPending);
        if !self.request_permission().await {
            run.enter(FlowState::PermissionDenied);
            return FlowOutcome::PermissionDenied;
        }

        if run.trigger == Trigger::Startup && self.cache.has_data() {
            info!("Cached weather present; skipping location request");
            return FlowOutcome::CachedDataPresent;
        }

        run.enter(FlowState::Acquiring);
        platform.notifier.progress(true);
        let outcome = self.acquire_and_fetch(run).await;
        platform.notifier.progress(false);
        outcome
    }

    /// Ask for fine + coarse location. A rationale request is honoured once.
    async fn request_permission(&self) -> bool {
        let platform = &self.platform;

        let mut report = platform.permissions.request(LOCATION_PERMISSIONS).await;
        if !report.all_granted && report.rationale_required && !report.permanently_denied {
            platform.notifier.notify(Notice::PermissionRationale);
            report = platform.permissions.request(LOCATION_PERMISSIONS).await;
        }

        if report.all_granted {
            return true;
        }

        if report.unanswered {
            info!("Location permission could not be requested");
            platform.notifier.notify(Notice::PermissionUnanswered);
            platform.settings.open(SettingsPage::AppPermissions);
            return false;
        }

        warn!(
            permanently = report.permanently_denied,
            "Location permission denied"
        );
        platform.notifier.notify(Notice::PermissionDenied);
        if report.permanently_denied {
            platform.settings.open(SettingsPage::AppPermissions);
        }
        false
    }

    async fn acquire_and_fetch(&self, run: &mut FlowRun) -> FlowOutcome {
        let request = LocationRequest::one_shot();
        let pending = self.platform.location.request_fix(&request);

        let fix = match timeout(self.location_timeout, pending).await {
            Ok(Ok(fix)) => fix,
            Ok(Err(err)) => {
                warn!(error = %err, "Location request failed");
                run.enter(FlowState::LocationFailed);
                self.platform.notifier.notify(Notice::LocationUnavailable);
                return FlowOutcome::LocationUnavailable(err.to_string());
            }
            Err(_) => {
                warn!(timeout = ?self.location_timeout, "No location fix arrived in time");
                run.enter(FlowState::TimedOut);
                self.platform.notifier.notify(Notice::LocationTimedOut);
                return FlowOutcome::LocationTimedOut;
            }
        };

        let at = fix.coordinates;
        info!(
            latitude = at.latitude,
            longitude = at.longitude,
            source = ?fix.source,
            "Current location"
        );
        run.enter(FlowState::Resolved(at));

        self.fetch_and_cache(at).await
    }

    /// Fetch weather for `at` and overwrite the cache on success.
    pub async fn fetch_and_cache(&self, at: Coordinates) -> FlowOutcome {
        if !is_network_available(self.platform.network.as_ref()) {
            self.platform.notifier.notify(Notice::NoConnectivity);
            return FlowOutcome::NoConnectivity;
        }

        match self.provider.fetch_weather(at).await {
            Ok(response) => {
                if let Err(err) = self.cache.store(&response) {
                    warn!(error = %err, "Fetched weather could not be cached");
                }
                FlowOutcome::Updated(response)
            }
            Err(err) => {
                error!(error = %err, "Weather fetch failed");
                FlowOutcome::FetchFailed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connectivity::{NetworkStatus, Transport},
        location::{Fix, LocationError, LocationService, ProviderKind},
        model::fixtures::london,
        platform::{Notifier, Permission, PermissionGate, PermissionReport, SettingsLauncher},
        provider::MissingApiKey,
    };
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    #[derive(Debug)]
    struct FakeLocation {
        enabled: bool,
        reply: Option<Result<Coordinates, LocationError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationService for FakeLocation {
        fn is_provider_enabled(&self, kind: ProviderKind) -> bool {
            kind == ProviderKind::Gps && self.enabled
        }

        async fn request_fix(&self, request: &LocationRequest) -> Result<Fix, LocationError> {
            assert_eq!(request.max_updates, 1);
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => reply.clone().map(|at| Fix::new(at, ProviderKind::Gps)),
                None => std::future::pending().await,
            }
        }
    }

    /// Replies in order; the last reply repeats once the queue is down to it.
    #[derive(Debug)]
    struct FakePermissions {
        replies: StdMutex<VecDeque<PermissionReport>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionGate for FakePermissions {
        async fn request(&self, permissions: &[Permission]) -> PermissionReport {
            assert_eq!(permissions, LOCATION_PERMISSIONS);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap_or_else(PermissionReport::denied)
            } else {
                replies
                    .front()
                    .copied()
                    .unwrap_or_else(PermissionReport::denied)
            }
        }
    }

    #[derive(Debug)]
    struct FakeNetwork(Option<Vec<Transport>>);

    impl NetworkStatus for FakeNetwork {
        fn active_transports(&self) -> Option<Vec<Transport>> {
            self.0.clone()
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        pages: StdMutex<Vec<SettingsPage>>,
        notices: StdMutex<Vec<Notice>>,
        progress: StdMutex<Vec<bool>>,
    }

    impl SettingsLauncher for Recorder {
        fn open(&self, page: SettingsPage) {
            self.pages.lock().unwrap().push(page);
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }

        fn progress(&self, active: bool) {
            self.progress.lock().unwrap().push(active);
        }
    }

    #[derive(Debug)]
    struct FakeProvider {
        reply: Result<WeatherResponse, FetchError>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WeatherProvider for FakeProvider {
        async fn fetch_weather(&self, _at: Coordinates) -> Result<WeatherResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }
    }

    struct Harness {
        location: Arc<FakeLocation>,
        permissions: Arc<FakePermissions>,
        network: Arc<FakeNetwork>,
        recorder: Arc<Recorder>,
        provider: Arc<FakeProvider>,
        cache: WeatherCache,
    }

    const HERE: Coordinates = Coordinates {
        latitude: 51.51,
        longitude: -0.13,
    };

    impl Harness {
        fn new() -> Self {
            Self {
                location: Arc::new(FakeLocation {
                    enabled: true,
                    reply: Some(Ok(HERE)),
                    calls: AtomicUsize::new(0),
                }),
                permissions: Arc::new(FakePermissions {
                    replies: StdMutex::new(VecDeque::from([PermissionReport::granted()])),
                    calls: AtomicUsize::new(0),
                }),
                network: Arc::new(FakeNetwork(Some(vec![Transport::Wifi]))),
                recorder: Arc::new(Recorder::default()),
                provider: Arc::new(FakeProvider {
                    reply: Ok(london()),
                    delay: None,
                    calls: AtomicUsize::new(0),
                }),
                cache: WeatherCache::in_memory(),
            }
        }

        fn location(
            mut self,
            enabled: bool,
            reply: Option<Result<Coordinates, LocationError>>,
        ) -> Self {
            self.location = Arc::new(FakeLocation {
                enabled,
                reply,
                calls: AtomicUsize::new(0),
            });
            self
        }

        fn permissions(mut self, replies: Vec<PermissionReport>) -> Self {
            self.permissions = Arc::new(FakePermissions {
                replies: StdMutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            });
            self
        }

        fn network(mut self, transports: Option<Vec<Transport>>) -> Self {
            self.network = Arc::new(FakeNetwork(transports));
            self
        }

        fn provider(
            mut self,
            reply: Result<WeatherResponse, FetchError>,
            delay: Option<Duration>,
        ) -> Self {
            self.provider = Arc::new(FakeProvider {
                reply,
                delay,
                calls: AtomicUsize::new(0),
            });
            self
        }

        fn flow(&self) -> WeatherFlow {
            self.flow_with(self.provider.clone())
        }

        fn flow_with(&self, provider: Arc<dyn WeatherProvider>) -> WeatherFlow {
            let platform = Platform {
                location: self.location.clone(),
                permissions: self.permissions.clone(),
                network: self.network.clone(),
                settings: self.recorder.clone(),
                notifier: self.recorder.clone(),
            };
            WeatherFlow::new(
                provider,
                self.cache.clone(),
                platform,
                Duration::from_secs(5),
            )
        }

        fn fetches(&self) -> usize {
            self.provider.calls.load(Ordering::SeqCst)
        }

        fn notices(&self) -> Vec<Notice> {
            self.recorder.notices.lock().unwrap().clone()
        }

        fn pages(&self) -> Vec<SettingsPage> {
            self.recorder.pages.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn fetches_caches_and_walks_every_state() {
        let h = Harness::new();

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::Updated(london()));
        assert_eq!(
            report.run.states,
            vec![
                FlowState::Idle,
                FlowState::PermissionPending,
                FlowState::Acquiring,
                FlowState::Resolved(HERE),
            ]
        );
        assert_eq!(h.cache.load(), Some(london()));
        assert_eq!(*h.recorder.progress.lock().unwrap(), vec![true, false]);
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn location_disabled_redirects_without_fetching() {
        let h = Harness::new().location(false, Some(Ok(HERE)));

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::LocationDisabled);
        assert_eq!(report.run.state(), FlowState::LocationDisabled);
        assert_eq!(h.pages(), vec![SettingsPage::Location]);
        assert_eq!(h.notices(), vec![Notice::LocationDisabled]);
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.fetches(), 0);
    }

    #[tokio::test]
    async fn offline_skips_fetch_and_tells_user() {
        let h = Harness::new().network(Some(vec![]));

        let report = h.flow().run(Trigger::Refresh).await;

        assert_eq!(report.outcome, FlowOutcome::NoConnectivity);
        assert_eq!(h.notices(), vec![Notice::NoConnectivity]);
        assert_eq!(h.fetches(), 0);
        assert!(h.cache.load().is_none());
    }

    #[tokio::test]
    async fn unavailable_network_service_counts_as_offline() {
        let h = Harness::new().network(None);
        let report = h.flow().run(Trigger::Refresh).await;
        assert_eq!(report.outcome, FlowOutcome::NoConnectivity);
    }

    #[tokio::test]
    async fn http_404_fails_without_touching_cache() {
        let h = Harness::new().provider(Err(FetchError::Http(404)), None);

        let report = h.flow().run(Trigger::Refresh).await;

        assert_eq!(report.outcome, FlowOutcome::FetchFailed(FetchError::Http(404)));
        assert!(h.cache.raw().is_none());
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_cache_entry() {
        let timed_out = FetchError::Network("timed out".into());
        let h = Harness::new().provider(Err(timed_out), None);
        let mut previous = london();
        previous.name = "Earlier".into();
        h.cache.store(&previous).unwrap();

        h.flow().run(Trigger::Refresh).await;

        assert_eq!(h.cache.load(), Some(previous));
    }

    #[tokio::test]
    async fn startup_with_cache_skips_location() {
        let h = Harness::new();
        h.cache.store(&london()).unwrap();

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::CachedDataPresent);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.fetches(), 0);
    }

    #[tokio::test]
    async fn refresh_with_cache_fetches_again() {
        let h = Harness::new();
        h.cache.store(&london()).unwrap();

        let report = h.flow().run(Trigger::Refresh).await;

        assert!(matches!(report.outcome, FlowOutcome::Updated(_)));
        assert_eq!(h.fetches(), 1);
    }

    #[tokio::test]
    async fn startup_without_api_key_still_serves_cache() {
        let h = Harness::new();
        h.cache.store(&london()).unwrap();

        let flow = h.flow_with(Arc::new(MissingApiKey));
        let report = flow.run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::CachedDataPresent);
        assert_eq!(h.cache.load(), Some(london()));
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn missing_api_key_is_reported_only_by_the_fetch() {
        let h = Harness::new();

        let flow = h.flow_with(Arc::new(MissingApiKey));
        let report = flow.run(Trigger::Refresh).await;

        assert_eq!(
            report.outcome,
            FlowOutcome::FetchFailed(FetchError::MissingApiKey)
        );
        assert_eq!(report.run.state(), FlowState::Resolved(HERE));
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 1);
        assert!(h.cache.raw().is_none());
    }

    #[tokio::test]
    async fn location_gate_runs_before_api_key_is_needed() {
        let h = Harness::new().location(false, None);

        let flow = h.flow_with(Arc::new(MissingApiKey));
        let report = flow.run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::LocationDisabled);
        assert_eq!(h.notices(), vec![Notice::LocationDisabled]);
    }

    #[tokio::test]
    async fn permanent_denial_halts_and_opens_app_settings() {
        let h = Harness::new()
            .permissions(vec![PermissionReport::permanently_denied()]);

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::PermissionDenied);
        assert_eq!(report.run.state(), FlowState::PermissionDenied);
        assert_eq!(h.notices(), vec![Notice::PermissionDenied]);
        assert_eq!(h.pages(), vec![SettingsPage::AppPermissions]);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plain_denial_halts_without_redirect() {
        let h = Harness::new().permissions(vec![PermissionReport::denied()]);

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::PermissionDenied);
        assert!(h.pages().is_empty());
    }

    #[tokio::test]
    async fn unanswered_permission_is_not_reported_as_a_denial() {
        let h = Harness::new()
            .permissions(vec![PermissionReport::unanswered()]);

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::PermissionDenied);
        assert_eq!(report.run.state(), FlowState::PermissionDenied);
        assert_eq!(h.notices(), vec![Notice::PermissionUnanswered]);
        assert_eq!(h.pages(), vec![SettingsPage::AppPermissions]);
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rationale_is_shown_then_permission_requested_again() {
        let h = Harness::new().permissions(vec![
            PermissionReport::needs_rationale(),
            PermissionReport::granted(),
        ]);

        let report = h.flow().run(Trigger::Startup).await;

        assert!(matches!(report.outcome, FlowOutcome::Updated(_)));
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.notices(), vec![Notice::PermissionRationale]);
    }

    #[tokio::test]
    async fn rationale_is_only_honoured_once() {
        let h = Harness::new().permissions(vec![
            PermissionReport::needs_rationale(),
            PermissionReport::needs_rationale(),
        ]);

        let report = h.flow().run(Trigger::Startup).await;

        assert_eq!(report.outcome, FlowOutcome::PermissionDenied);
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_times_out() {
        let h = Harness::new().location(true, None);

        let report = h.flow().run(Trigger::Refresh).await;

        assert_eq!(report.outcome, FlowOutcome::LocationTimedOut);
        assert_eq!(report.run.state(), FlowState::TimedOut);
        assert_eq!(h.notices(), vec![Notice::LocationTimedOut]);
        assert_eq!(*h.recorder.progress.lock().unwrap(), vec![true, false]);
        assert_eq!(h.fetches(), 0);
    }

    #[tokio::test]
    async fn location_error_ends_run_in_failed_state() {
        let failure = LocationError::Unavailable("no satellites".into());
        let h = Harness::new().location(true, Some(Err(failure)));

        let report = h.flow().run(Trigger::Refresh).await;

        assert!(matches!(
            &report.outcome,
            FlowOutcome::LocationUnavailable(msg) if msg.contains("no satellites")
        ));
        assert_eq!(report.run.state(), FlowState::LocationFailed);
        assert_eq!(h.notices(), vec![Notice::LocationUnavailable]);
        assert_eq!(*h.recorder.progress.lock().unwrap(), vec![true, false]);
        assert_eq!(h.fetches(), 0);
    }

    #[tokio::test]
    async fn repeated_runs_keep_the_granted_permission() {
        let h = Harness::new();
        let flow = h.flow();

        for _ in 0..3 {
            let report = flow.run(Trigger::Refresh).await;
            assert!(matches!(report.outcome, FlowOutcome::Updated(_)));
        }
        assert_eq!(h.permissions.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_is_rejected() {
        let h = Harness::new()
            .provider(Ok(london()), Some(Duration::from_secs(2)));
        let flow = h.flow();

        let (first, second) = tokio::join!(flow.run(Trigger::Refresh), flow.run(Trigger::Refresh));

        assert!(matches!(first.outcome, FlowOutcome::Updated(_)));
        assert_eq!(second.outcome, FlowOutcome::AlreadyRunning);
        assert_eq!(h.fetches(), 1);

        let third = flow.run(Trigger::Refresh).await;
        assert!(matches!(third.outcome, FlowOutcome::Updated(_)));
        assert_eq!(h.fetches(), 2);
    }
}
