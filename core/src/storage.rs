//! Persistence API for companies, users, solutions and products.
//!
//! Hosts depend on the [`Storage`] trait; [`SqliteStorage`](crate::sqlite::SqliteStorage)
//! is the bundled implementation.

use thiserror::Error;

use crate::models::{
    Company, CompanyId, NewUser, Product, Solution, SolutionId, User, UserId, UserProfileUpdate,
    UserRole,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    /// The request clashes with stored state (duplicate email, solution
    /// under review, ...).
    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration {version} failed: {reason}")]
    Migration { version: i64, reason: String },

    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UserSortField {
    #[default]
    Name,
    Email,
    Role,
    CreatedAt,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Search, filter and sort of the company users table.
#[derive(Clone, Debug, Default)]
pub struct UserQuery {
    /// Case-insensitive substring of name or email.
    pub search: Option<String>,
    pub role: Option<UserRole>,
    pub sort: UserSortField,
    pub direction: SortDirection,
}

impl UserQuery {
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn sorted_by(mut self, sort: UserSortField, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }
}

pub trait Storage {
    fn create_company(&self, company: &Company) -> Result<()>;
    /// Replaces name, contact and billing details of an existing company.
    fn update_company_details(&self, company: &Company) -> Result<Company>;
    fn get_company_details(&self, id: &CompanyId) -> Result<Company>;

    fn create_user(&self, user: NewUser) -> Result<User>;
    fn update_user_profile(&self, id: &UserId, update: UserProfileUpdate) -> Result<User>;
    fn get_users_by_company(&self, company_id: &CompanyId, query: &UserQuery) -> Result<Vec<User>>;
    fn delete_user(&self, id: &UserId) -> Result<()>;

    /// Stores a new draft and links the products it lists.
    fn create_solution(&self, solution: &Solution) -> Result<()>;
    fn get_solutions(&self, company_id: &CompanyId) -> Result<Vec<Solution>>;
    fn get_solution(&self, id: &SolutionId) -> Result<Solution>;
    /// Saves an edited solution. Only drafts and rejected solutions change.
    /// `product_ids` replaces the set of products linked to it.
    fn update_solution(&self, solution: &Solution) -> Result<Solution>;
    fn delete_solution(&self, id: &SolutionId) -> Result<()>;
    /// Re-evaluates the stored formulas and moves a draft or rejected
    /// solution without failed calculations to `pending_review`.
    fn submit_solution_for_review(&self, id: &SolutionId) -> Result<Solution>;
    /// Approves or rejects a solution waiting for review.
    fn review_solution(&self, id: &SolutionId, approve: bool) -> Result<Solution>;

    fn upsert_product(&self, product: &Product) -> Result<()>;
    fn list_products(&self, company_id: &CompanyId) -> Result<Vec<Product>>;
}

/// Rejects obviously malformed email addresses.
pub(crate) fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StorageError::validation(format!("invalid email address: {email}")))
    }
}
