//! Domain services
//!
//! Each service takes the caller's principal (if any), asks the access gate
//! for the required level, and only then touches storage.

pub mod custody;
pub mod directory;
pub mod ledger;
pub mod notify;
pub mod registry;

pub use custody::{spawn_audit_task, ConsistencyReport, CustodyCoordinator};
pub use directory::{NewUser, UserDirectory, UserUpdate};
pub use ledger::{Ledger, NewRecord, RecordUpdate};
pub use notify::{
    KeyRequest, LogNotifier, NotificationService, Notifier, RelayNotifier, ReportRequest,
    ReturnRequest,
};
pub use registry::{KeyRegistry, KeyUpdate, NewKey};

use std::sync::Arc;

use crate::auth::AccessGate;
use crate::store::Stores;

/// Every service, wired over one set of stores
#[derive(Clone)]
pub struct Services {
    pub gate: AccessGate,
    pub registry: KeyRegistry,
    pub directory: UserDirectory,
    pub custody: Arc<CustodyCoordinator>,
    pub ledger: Ledger,
    pub notifications: Arc<NotificationService>,
}

impl Services {
    pub fn new(
        stores: &Stores,
        gate: AccessGate,
        notifier: Arc<dyn Notifier>,
        admin_email: String,
        mail_sender: String,
    ) -> Self {
        let registry = KeyRegistry::new(stores.keys.clone(), stores.ledger.clone(), gate.clone());
        let directory = UserDirectory::new(stores.users.clone(), gate.clone());
        let custody = CustodyCoordinator::new(
            registry.clone(),
            directory.clone(),
            stores.users.clone(),
            gate.clone(),
        );
        let ledger = Ledger::new(stores.ledger.clone(), gate.clone());
        let notifications = NotificationService::new(
            notifier,
            admin_email,
            mail_sender,
            custody.clone(),
            gate.clone(),
        );

        Self {
            gate,
            registry,
            directory,
            custody: Arc::new(custody),
            ledger,
            notifications: Arc::new(notifications),
        }
    }
}
