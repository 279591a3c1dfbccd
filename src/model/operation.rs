use thiserror::Error;

use super::UserRole;

/// Engine operations that carry a login policy, by wire identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    ProvisionKey = 1,
    RetrieveKey = 2,
    Sign = 3,
    RemoveKey = 4,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::ProvisionKey,
        Operation::RetrieveKey,
        Operation::Sign,
        Operation::RemoveKey,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn login_requirement(self) -> LoginRequirement {
        match self {
            Operation::ProvisionKey | Operation::RemoveKey => {
                LoginRequirement::required(UserRole::SecurityOfficer)
            }
            Operation::Sign => LoginRequirement::required(UserRole::User),
            Operation::RetrieveKey => LoginRequirement::NONE,
        }
    }
}

impl TryFrom<u32> for Operation {
    type Error = OperationError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Operation::ALL
            .into_iter()
            .find(|op| op.id() == id)
            .ok_or(OperationError::Unknown { id })
    }
}

/// Whether an operation needs a login, and as whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRequirement {
    pub login_required: bool,
    pub role: Option<UserRole>,
}

impl LoginRequirement {
    pub const NONE: LoginRequirement = LoginRequirement {
        login_required: false,
        role: None,
    };

    pub fn required(role: UserRole) -> Self {
        Self {
            login_required: true,
            role: Some(role),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    #[error("Unknown operation id {id}")]
    Unknown { id: u32 },
}
