//! sea-orm entities for the tracker schema (see `crate::migrator`).

pub mod assembly_component;
pub mod audit_log;
pub mod part;
pub mod part_note;
pub mod responsible_history;
pub mod role;
pub mod route_stage;
pub mod route_template;
pub mod stage;
pub mod status_history;
pub mod user;

pub use part::Model as PartModel;
pub use role::Model as RoleModel;
pub use stage::Model as StageModel;
pub use status_history::StatusType;
pub use user::Model as UserModel;
