//! Shared gateway state

use std::sync::Arc;

use crate::audit::AuditLogService;
use crate::balance::BalanceService;
use crate::db::ConnectionManager;
use crate::engine::TransactionEngine;
use crate::events::ReplayEngine;
use crate::resilience::FallbackManager;
use crate::users::UserService;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransactionEngine>,
    pub kernel: Arc<BalanceService>,
    pub users: Arc<UserService>,
    pub audit: Arc<AuditLogService>,
    pub replay: Arc<ReplayEngine>,
    pub db: Arc<ConnectionManager>,
    pub fallback: Arc<FallbackManager>,
}
