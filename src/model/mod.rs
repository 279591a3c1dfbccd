mod credential;
mod hardware_slot;
mod operation;
mod policy;
mod role;
mod slot;

pub use credential::{Credential, CredentialError, UserRole};
pub use hardware_slot::HardwareSlot;
pub use operation::{LoginRequirement, Operation, OperationError};
pub use policy::{KeyMode, PinPolicy, PolicyError, TouchPolicy};
pub use role::{Role, RoleError};
pub use slot::{PivSlot, SlotError, SlotId, NUM_SLOTS};
