pub mod audit;
pub mod crm;
pub mod email;
pub mod tenants;

pub use audit::{ActivityEntry, ActivityKind, ActivityLog, MemoryActivityLog, PgActivityLog};
pub use crm::{CrmError, DataSource, HttpCrmClient, NewNote, RecordWriter};
pub use email::{EmailNotifier, Notification, Notifier, NotifyError};
pub use tenants::{StaticTenantDirectory, TenantConfig, TenantDirectory};
