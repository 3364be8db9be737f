//! Runtime assembly.
//!
//! All collaborators arrive through the builder; nothing reads ambient
//! global state. The corrective services (client re-sync, device trust)
//! issue their own requests through a bare pipeline without corrective
//! middleware, so a failing correction can never recurse into itself.

use crate::runtime::{ActiveSession, Runtime, RuntimeRefresher};
use postern_core::{
    Clock, Error, KeyValueStore, Result, RetryPolicy, RuntimeConfig, SystemClock,
};
use postern_session::{
    ClientSync, ClientSyncValidator, DeviceAttestor, DeviceProofRetrier, DeviceTrustService,
    SessionPoller, SessionService,
};
use postern_telemetry::{HttpCollector, SdkEnvironment, TelemetryCollector, TelemetryPipeline};
use postern_transport::{
    ApiClient, AuthorizationPreparer, DeviceTokenValidator, ErrorDecodeValidator,
    FormEncodePreparer, HttpTransport, LocalePreparer, Middleware, PathPrefixPreparer,
    ReqwestTransport, SdkHeadersPreparer, StaticQueryPreparer,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Arc<dyn Clock>,
    attestor: Option<Arc<dyn DeviceAttestor>>,
    collector: Option<Arc<dyn TelemetryCollector>>,
}

impl RuntimeBuilder {
    /// Start a builder for the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            clock: Arc::new(SystemClock),
            attestor: None,
            collector: None,
        }
    }

    /// Supply the durable key-value store (required).
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the HTTP transport (tests use a mock).
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the clock (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Supply the platform device-trust ceremonies. Without one, device
    /// proof demands propagate as plain API errors.
    pub fn with_attestor(mut self, attestor: Arc<dyn DeviceAttestor>) -> Self {
        self.attestor = Some(attestor);
        self
    }

    /// Override the telemetry collector.
    pub fn with_collector(mut self, collector: Arc<dyn TelemetryCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Assemble the runtime.
    pub fn build(self) -> Result<Runtime> {
        let RuntimeBuilder {
            config,
            store,
            transport,
            clock,
            attestor,
            collector,
        } = self;

        let instance_kind = config.instance_kind()?;
        let base_url = config.resolved_base_url()?;
        let store = store.ok_or_else(|| Error::config("a key-value store is required"))?;
        let transport: Arc<dyn HttpTransport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&base_url)?),
        };
        let policy = RetryPolicy::new(config.retry);

        // Bare pipeline for corrective services: standard preparers and
        // error decoding, but no corrective middleware.
        let mut bare_stages = standard_preparers(&config, &store);
        bare_stages.push(Middleware::validate(DeviceTokenValidator::new(Arc::clone(
            &store,
        ))));
        bare_stages.push(Middleware::validate(ErrorDecodeValidator));
        let bare_api = Arc::new(
            ApiClient::new(Arc::clone(&transport))
                .with_policy(policy)
                .with_clock(Arc::clone(&clock))
                .with_middleware(bare_stages),
        );

        let sync = ClientSync::new(Arc::clone(&bare_api), Arc::clone(&store));
        let device = attestor.map(|attestor| DeviceTrustService::new(Arc::clone(&bare_api), attestor));

        // Full pipeline seen by callers.
        let mut stages = standard_preparers(&config, &store);
        stages.push(Middleware::validate(DeviceTokenValidator::new(Arc::clone(
            &store,
        ))));
        stages.push(Middleware::validate(ClientSyncValidator::new(sync.clone())));
        stages.push(Middleware::validate(ErrorDecodeValidator));
        if let Some(device) = &device {
            stages.push(Middleware::retry(DeviceProofRetrier::new(device.clone())));
        }
        let api = Arc::new(
            ApiClient::new(Arc::clone(&transport))
                .with_policy(policy)
                .with_clock(Arc::clone(&clock))
                .with_middleware(stages),
        );

        let sessions = Arc::new(SessionService::new(Arc::clone(&api), Arc::clone(&clock)));

        let active_session: ActiveSession = Arc::new(Mutex::new(None));
        let refresher = Arc::new(RuntimeRefresher::new(
            Arc::clone(&sessions),
            Arc::clone(&active_session),
        ));
        let poller = SessionPoller::new(config.polling, refresher);

        let collector: Arc<dyn TelemetryCollector> = match collector {
            Some(collector) => collector,
            None => Arc::new(HttpCollector::new(config.telemetry.endpoint.clone())?),
        };
        let telemetry = TelemetryPipeline::new(
            config.telemetry.clone(),
            SdkEnvironment::new(instance_kind, Some(config.publishable_key.clone())),
            Arc::clone(&store),
            Arc::clone(&clock),
            collector,
        );

        info!(%base_url, instance_kind = instance_kind.as_str(), "runtime assembled");
        Ok(Runtime::assemble(
            api,
            sessions,
            sync,
            device,
            poller,
            telemetry,
            active_session,
        ))
    }
}

/// The preparer stages every pipeline carries, in their standard order:
/// proxy prefix, SDK headers, locale, fixed query, authorization, form
/// encoding.
fn standard_preparers(config: &RuntimeConfig, store: &Arc<dyn KeyValueStore>) -> Vec<Middleware> {
    let mut stages = Vec::new();
    if let Some(prefix) = &config.proxy_path {
        stages.push(Middleware::prepare(PathPrefixPreparer::new(prefix.clone())));
    }
    stages.push(Middleware::prepare(SdkHeadersPreparer::new()));
    if let Some(locale) = &config.locale {
        stages.push(Middleware::prepare(LocalePreparer::new(locale.clone())));
    }
    stages.push(Middleware::prepare(StaticQueryPreparer::new(vec![(
        "_is_native".to_string(),
        "1".to_string(),
    )])));
    stages.push(Middleware::prepare(AuthorizationPreparer::new(Arc::clone(
        store,
    ))));
    stages.push(Middleware::prepare(FormEncodePreparer));
    stages
}
