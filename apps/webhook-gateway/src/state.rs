use std::sync::Arc;

use anyhow::{Context, Result};
use security::{
    AuthGate, LoggingNotifier, MemoryOrganisationStore, MemoryOtpStore, OrgTokenSigner,
    SharedOtpNotifier, SharedOtpStore,
};
use tracing::info;
use ucg_core::platforms::mamacare::{ChatSessions, MamacareAdapter, MaternalHealthDialogue};
use ucg_core::platforms::webform::{MemoryComplaintStore, TaxonomyClient, WebformAdapter};
use ucg_core::platforms::whatsapp::{GraphClient, GraphTokenExchanger, WhatsAppConfig};
use ucg_core::platforms::{PartnerAdapter, WhatsAppAdapter};
use ucg_core::{
    AdapterRegistry, CredentialStore, MemoryConversationStore, MemoryMessageLog, MessageRouter,
    Partner, Pipeline, PlatformCredentials, SharedAdapter, SharedConversationStore,
    SharedMessageLog, TokenManager,
};
use ucg_transform::{CeemisTransform, CpimsTransform, EemisTransform};

use crate::config::{GatewayConfig, NumberConfig};

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub registry: AdapterRegistry,
    pub pipeline: Pipeline,
    pub webform: Arc<WebformAdapter>,
    pub gate: Arc<AuthGate>,
    pub otps: SharedOtpStore,
    pub notifier: SharedOtpNotifier,
}

impl AppState {
    pub fn conversations(&self) -> &SharedConversationStore {
        self.pipeline.conversations()
    }

    pub fn log(&self) -> &SharedMessageLog {
        self.pipeline.log()
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let http = config
            .http
            .build_client()
            .context("build outbound HTTP client")?;

        let log: SharedMessageLog = Arc::new(MemoryMessageLog::new());
        let conversations: SharedConversationStore =
            Arc::new(MemoryConversationStore::new(Arc::clone(&log)));

        let router = MessageRouter::new(
            http.clone(),
            config.router.clone(),
            Arc::clone(&conversations),
            Arc::clone(&log),
        )
        .with_transform(Arc::new(CpimsTransform::new(http.clone(), config.cpims.clone())))
        .with_transform(Arc::new(CeemisTransform::new(http.clone(), config.ceemis.clone())))
        .with_transform(Arc::new(EemisTransform::new(http.clone(), config.eemis.clone())));
        let pipeline = Pipeline::new(
            Arc::clone(&conversations),
            Arc::clone(&log),
            Arc::new(router),
        );

        let credentials = Arc::new(CredentialStore::new());
        let exchanger = Arc::new(GraphTokenExchanger::new(
            http.clone(),
            config.whatsapp_api_base.clone(),
        ));
        let number = |platform: &str, settings: &NumberConfig| {
            seed_credentials(&credentials, platform, settings);
            let tokens = Arc::new(TokenManager::new(
                platform,
                Arc::clone(&credentials),
                exchanger.clone(),
                config.token_refresh_grace_secs,
            ));
            let graph = GraphClient::new(
                http.clone(),
                whatsapp_config(platform, settings, config),
                tokens,
            );
            WhatsAppAdapter::new(Arc::new(graph))
        };

        let mut registry = AdapterRegistry::new();
        registry.register_instance("whatsapp", Arc::new(number("whatsapp", &config.whatsapp)));

        let sessions = Arc::new(ChatSessions::new(
            ucg_core::platforms::mamacare::PLATFORM,
            Arc::clone(&conversations),
        ));
        let mamacare = MamacareAdapter::new(
            number(ucg_core::platforms::mamacare::PLATFORM, &config.mamacare),
            Arc::new(MaternalHealthDialogue::new(sessions)),
        );
        registry.register_instance(ucg_core::platforms::mamacare::PLATFORM, Arc::new(mamacare));

        let webform = Arc::new(WebformAdapter::new(
            Arc::new(MemoryComplaintStore::new()),
            Arc::new(TaxonomyClient::new(http.clone(), config.taxonomy.clone())),
        ));
        registry.register_instance(
            ucg_core::platforms::webform::PLATFORM,
            Arc::clone(&webform) as SharedAdapter,
        );
        for partner in Partner::ALL {
            registry.register(partner.as_str(), move || {
                Arc::new(PartnerAdapter::new(partner)) as SharedAdapter
            });
        }
        info!(platforms = ?registry.available(), "adapters registered");

        let gate = Arc::new(AuthGate::new(
            OrgTokenSigner::new(config.jwt_secret.clone()),
            Arc::new(MemoryOrganisationStore::new()),
        ));

        Ok(Self {
            registry,
            pipeline,
            webform,
            gate,
            otps: Arc::new(MemoryOtpStore::new()),
            notifier: Arc::new(LoggingNotifier),
        })
    }
}

fn whatsapp_config(platform: &str, settings: &NumberConfig, config: &GatewayConfig) -> WhatsAppConfig {
    let mut wa = WhatsAppConfig::new(platform, settings.phone_number_id.clone());
    wa.verify_token = settings.verify_token.clone();
    wa.app_secret = settings.app_secret.clone();
    wa.api_base = config.whatsapp_api_base.clone();
    wa.org_id = settings.org_id.clone();
    wa.media_max_bytes = config.media_max_bytes;
    wa
}

fn seed_credentials(store: &CredentialStore, platform: &str, settings: &NumberConfig) {
    let Some(token) = &settings.access_token else {
        return;
    };
    let mut creds = PlatformCredentials::new(settings.org_id.clone(), platform, token.clone());
    creds.client_id = settings.client_id.clone();
    creds.client_secret = settings.client_secret.clone();
    creds.token_expiry = settings.token_expiry;
    creds.business_id = settings.business_id.clone();
    creds.phone_number_id =
        Some(settings.phone_number_id.clone()).filter(|id| !id.is_empty());
    store.put(creds);
}
