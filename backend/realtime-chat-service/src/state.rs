use crate::{
    collaborators::Collaborators,
    config::Config,
    security::JwtVerifier,
    services::{
        conversation_service::ServiceSettings, AccessController, AuditLog, ConversationService,
        ParticipantResolver,
    },
    storage::ChatStore,
    websocket::RealtimeGateway,
};
use crypto_core::{KeyDerivationStore, MasterSecret, MessageCipher};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: Arc<JwtVerifier>,
    pub service: Arc<ConversationService>,
    pub gateway: RealtimeGateway,
    pub audit: AuditLog,
}

impl AppState {
    /// Wire the service graph: keys -> cipher, store -> audit -> access
    /// control -> conversation service -> gateway.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        collaborators: Collaborators,
        master: MasterSecret,
    ) -> Self {
        let keys = Arc::new(KeyDerivationStore::with_iterations(
            master,
            config.key_derivation_iterations,
        ));
        let cipher = MessageCipher::new(keys);

        let audit = AuditLog::new(
            store.clone(),
            config.audit_max_entries_per_actor,
            config.collaborator_timeout,
        );
        let resolver =
            ParticipantResolver::new(collaborators.profiles.clone(), config.collaborator_timeout);
        let access = AccessController::new(
            store.clone(),
            resolver,
            audit.clone(),
            config.collaborator_timeout,
        );

        let service = Arc::new(ConversationService::new(
            store,
            cipher,
            access,
            collaborators,
            ServiceSettings::from(config.as_ref()),
        ));
        let jwt = Arc::new(JwtVerifier::new(&config.jwt_secret));
        let gateway = RealtimeGateway::new(service.clone(), jwt.clone(), config.typing_timeout);

        Self {
            config,
            jwt,
            service,
            gateway,
            audit,
        }
    }
}
