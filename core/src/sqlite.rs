//! [`SqliteStorage`]: the SQLite-backed [`Storage`] implementation.
//!
//! Categories, parameters and calculations of a solution are stored as JSON
//! columns. Products point at the solution they belong to; a solution's
//! `product_ids` are read back from those links.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::migrations;
use crate::models::{
    Company, CompanyId, NewUser, Product, ProductId, Solution, SolutionId, SolutionStatus, User,
    UserId, UserProfileUpdate, UserRole,
};
use crate::parameters::ParameterStore;
use crate::recalc::Recalculator;
use crate::storage::{
    validate_email, Result, SortDirection, Storage, StorageError, UserQuery, UserSortField,
};

const COMPANY_COLUMNS: &str =
    "id, name, contact_email, phone, website, address, billing, created_at, updated_at";
const USER_COLUMNS: &str = "id, company_id, name, email, role, job_title, created_at";
const SOLUTION_COLUMNS: &str = "id, company_id, name, description, status, categories, \
     parameters, calculations, created_at, updated_at";
const PRODUCT_COLUMNS: &str = "id, company_id, name, manufacturer, description, ppue, solution_id";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    /// Re-evaluates stored formulas before a solution goes to review.
    recalculator: Recalculator,
}

impl SqliteStorage {
    /// Opens the configured database, applying the configured formula limit.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut store = Self::open(&config.storage.database_path)?;
        store.recalculator.max_formula_len = config.formula.max_length;
        Ok(store)
    }

    /// Opens (or creates) the database at `path` and migrates it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

        let version = migrations::ensure_schema(&conn).map_err(|(version, e)| {
            StorageError::Migration {
                version,
                reason: e.to_string(),
            }
        })?;
        debug!(version, "schema ready");

        Ok(Self {
            conn: Mutex::new(conn),
            recalculator: Recalculator::default(),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

// --- Column helpers ---

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, format!("bad timestamp {text:?}: {e}")))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(index)?;
    text.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn scan_company(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: CompanyId(row.get(0)?),
        name: row.get(1)?,
        contact_email: row.get(2)?,
        phone: row.get(3)?,
        website: row.get(4)?,
        address: optional_json_column(row, 5)?,
        billing: json_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn scan_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(4)?;
    Ok(User {
        id: UserId(row.get(0)?),
        company_id: CompanyId(row.get(1)?),
        name: row.get(2)?,
        email: row.get(3)?,
        role: UserRole::parse(&role)
            .ok_or_else(|| conversion_error(4, format!("unknown role {role:?}")))?,
        job_title: row.get(5)?,
        created_at: timestamp_column(row, 6)?,
    })
}

fn scan_solution(row: &Row<'_>) -> rusqlite::Result<Solution> {
    let status: String = row.get(4)?;
    Ok(Solution {
        id: SolutionId(row.get(0)?),
        company_id: CompanyId(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        status: SolutionStatus::parse(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown status {status:?}")))?,
        categories: json_column(row, 5)?,
        parameters: json_column(row, 6)?,
        calculations: json_column(row, 7)?,
        product_ids: Vec::new(),
        created_at: timestamp_column(row, 8)?,
        updated_at: timestamp_column(row, 9)?,
    })
}

fn scan_product(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: ProductId(row.get(0)?),
        company_id: CompanyId(row.get(1)?),
        name: row.get(2)?,
        manufacturer: row.get(3)?,
        description: row.get(4)?,
        ppue: row.get(5)?,
        solution_id: row.get::<_, Option<String>>(6)?.map(SolutionId),
    })
}

// --- Shared lookups ---

fn load_company(conn: &Connection, id: &CompanyId) -> Result<Company> {
    conn.query_row(
        &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1"),
        params![id.as_str()],
        scan_company,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("company", id.as_str()))
}

fn ensure_company(conn: &Connection, id: &CompanyId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM companies WHERE id = ?1)",
        params![id.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StorageError::not_found("company", id.as_str()))
    }
}

fn load_user(conn: &Connection, id: &UserId) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id.as_str()],
        scan_user,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("user", id.as_str()))
}

/// Fails when another user already has `email`, ignoring case.
fn ensure_email_free(conn: &Connection, email: &str, except: Option<&UserId>) -> Result<()> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower(?1) AND id IS NOT ?2)",
        params![email, except.map(UserId::as_str)],
        |row| row.get(0),
    )?;
    if taken {
        Err(StorageError::conflict(format!("email already registered: {email}")))
    } else {
        Ok(())
    }
}

fn load_solution(conn: &Connection, id: &SolutionId) -> Result<Solution> {
    let mut solution = conn
        .query_row(
            &format!("SELECT {SOLUTION_COLUMNS} FROM solutions WHERE id = ?1"),
            params![id.as_str()],
            scan_solution,
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found("solution", id.as_str()))?;
    solution.product_ids = load_product_ids(conn, id)?;
    Ok(solution)
}

fn load_product_ids(conn: &Connection, solution_id: &SolutionId) -> Result<Vec<ProductId>> {
    let mut stmt = conn.prepare("SELECT id FROM products WHERE solution_id = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![solution_id.as_str()], |row| Ok(ProductId(row.get(0)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Links exactly `product_ids` to the solution.
fn link_products(
    conn: &Connection,
    solution_id: &SolutionId,
    company_id: &CompanyId,
    product_ids: &[ProductId],
) -> Result<()> {
    for product_id in product_ids {
        let (owner, linked_to): (String, Option<String>) = conn
            .query_row(
                "SELECT company_id, solution_id FROM products WHERE id = ?1",
                params![product_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("product", product_id.as_str()))?;
        if owner != company_id.as_str() {
            return Err(StorageError::validation(format!(
                "product {product_id} belongs to another company"
            )));
        }
        if linked_to.is_some_and(|other| other != solution_id.as_str()) {
            return Err(StorageError::conflict(format!(
                "product {product_id} is linked to another solution"
            )));
        }
    }

    conn.execute(
        "UPDATE products SET solution_id = NULL WHERE solution_id = ?1",
        params![solution_id.as_str()],
    )?;
    for product_id in product_ids {
        conn.execute(
            "UPDATE products SET solution_id = ?1 WHERE id = ?2",
            params![solution_id.as_str(), product_id.as_str()],
        )?;
    }
    Ok(())
}

fn set_solution_status(conn: &Connection, id: &SolutionId, status: SolutionStatus) -> Result<()> {
    conn.execute(
        "UPDATE solutions SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), format_timestamp(&Utc::now()), id.as_str()],
    )?;
    Ok(())
}

fn user_order_by(query: &UserQuery) -> String {
    let column = match query.sort {
        UserSortField::Name => "lower(name)",
        UserSortField::Email => "lower(email)",
        UserSortField::Role => {
            "CASE role WHEN 'admin' THEN 0 WHEN 'member' THEN 1 ELSE 2 END"
        }
        UserSortField::CreatedAt => "created_at",
    };
    let direction = match query.direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    };
    format!("{column} {direction}, lower(name) ASC, id ASC")
}

impl Storage for SqliteStorage {
    fn create_company(&self, company: &Company) -> Result<()> {
        if company.name.trim().is_empty() {
            return Err(StorageError::validation("company name is required"));
        }
        if !company.contact_email.is_empty() {
            validate_email(&company.contact_email)?;
        }
        if !company.billing.billing_email.is_empty() {
            validate_email(&company.billing.billing_email)?;
        }
        let conn = self.lock_conn()?;
        conn.execute(
            &format!("INSERT INTO companies ({COMPANY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                company.id.as_str(),
                company.name.trim(),
                company.contact_email,
                company.phone,
                company.website,
                company.address.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&company.billing)?,
                format_timestamp(&company.created_at),
                format_timestamp(&company.updated_at),
            ],
        )?;
        info!(id = %company.id, "company created");
        Ok(())
    }

    fn update_company_details(&self, company: &Company) -> Result<Company> {
        if company.name.trim().is_empty() {
            return Err(StorageError::validation("company name is required"));
        }
        if !company.contact_email.is_empty() {
            validate_email(&company.contact_email)?;
        }
        if !company.billing.billing_email.is_empty() {
            validate_email(&company.billing.billing_email)?;
        }
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE companies SET name = ?1, contact_email = ?2, phone = ?3, website = ?4, \
             address = ?5, billing = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                company.name.trim(),
                company.contact_email,
                company.phone,
                company.website,
                company.address.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&company.billing)?,
                format_timestamp(&Utc::now()),
                company.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found("company", company.id.as_str()));
        }
        info!(id = %company.id, "company details updated");
        load_company(&conn, &company.id)
    }

    fn get_company_details(&self, id: &CompanyId) -> Result<Company> {
        let conn = self.lock_conn()?;
        load_company(&conn, id)
    }

    fn create_user(&self, user: NewUser) -> Result<User> {
        let name = user.name.trim();
        if name.is_empty() {
            return Err(StorageError::validation("user name is required"));
        }
        let email = user.email.trim();
        validate_email(email)?;

        let conn = self.lock_conn()?;
        ensure_company(&conn, &user.company_id)?;
        ensure_email_free(&conn, email, None)?;

        let created = User {
            id: UserId::generate(email),
            company_id: user.company_id,
            name: name.to_string(),
            email: email.to_string(),
            role: user.role,
            job_title: user.job_title,
            created_at: Utc::now(),
        };
        conn.execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                created.id.as_str(),
                created.company_id.as_str(),
                created.name,
                created.email,
                created.role.as_str(),
                created.job_title,
                format_timestamp(&created.created_at),
            ],
        )?;
        info!(id = %created.id, company = %created.company_id, "user created");
        Ok(created)
    }

    fn update_user_profile(&self, id: &UserId, update: UserProfileUpdate) -> Result<User> {
        let conn = self.lock_conn()?;
        let mut user = load_user(&conn, id)?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(StorageError::validation("user name is required"));
            }
            user.name = name.trim().to_string();
        }
        if let Some(email) = update.email {
            let email = email.trim();
            validate_email(email)?;
            ensure_email_free(&conn, email, Some(id))?;
            user.email = email.to_string();
        }
        if let Some(job_title) = update.job_title {
            user.job_title = job_title;
        }
        if let Some(role) = update.role {
            user.role = role;
        }

        conn.execute(
            "UPDATE users SET name = ?1, email = ?2, role = ?3, job_title = ?4 WHERE id = ?5",
            params![
                user.name,
                user.email,
                user.role.as_str(),
                user.job_title,
                id.as_str()
            ],
        )?;
        debug!(id = %id, "user profile updated");
        Ok(user)
    }

    fn get_users_by_company(&self, company_id: &CompanyId, query: &UserQuery) -> Result<Vec<User>> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE company_id = ?1 \
             AND (?2 IS NULL OR instr(lower(name), ?2) > 0 OR instr(lower(email), ?2) > 0) \
             AND (?3 IS NULL OR role = ?3) \
             ORDER BY {}",
            user_order_by(query)
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(
                params![
                    company_id.as_str(),
                    search,
                    query.role.map(|r| r.as_str())
                ],
                scan_user,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn delete_user(&self, id: &UserId) -> Result<()> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![id.as_str()])?;
        if deleted == 0 {
            return Err(StorageError::not_found("user", id.as_str()));
        }
        info!(id = %id, "user deleted");
        Ok(())
    }

    fn create_solution(&self, solution: &Solution) -> Result<()> {
        if solution.name.trim().is_empty() {
            return Err(StorageError::validation("solution name is required"));
        }
        if solution.status != SolutionStatus::Draft {
            return Err(StorageError::validation(format!(
                "new solutions start as draft, not {}",
                solution.status.as_str()
            )));
        }
        let conn = self.lock_conn()?;
        ensure_company(&conn, &solution.company_id)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO solutions ({SOLUTION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                solution.id.as_str(),
                solution.company_id.as_str(),
                solution.name.trim(),
                solution.description,
                solution.status.as_str(),
                serde_json::to_string(&solution.categories)?,
                serde_json::to_string(&solution.parameters)?,
                serde_json::to_string(&solution.calculations)?,
                format_timestamp(&solution.created_at),
                format_timestamp(&solution.updated_at),
            ],
        )?;
        link_products(&tx, &solution.id, &solution.company_id, &solution.product_ids)?;
        tx.commit()?;
        info!(id = %solution.id, company = %solution.company_id, "solution created");
        Ok(())
    }

    fn get_solutions(&self, company_id: &CompanyId) -> Result<Vec<Solution>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOLUTION_COLUMNS} FROM solutions WHERE company_id = ?1 \
             ORDER BY updated_at DESC, name ASC"
        ))?;
        let mut solutions = stmt
            .query_map(params![company_id.as_str()], scan_solution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for solution in &mut solutions {
            solution.product_ids = load_product_ids(&conn, &solution.id)?;
        }
        Ok(solutions)
    }

    fn get_solution(&self, id: &SolutionId) -> Result<Solution> {
        let conn = self.lock_conn()?;
        load_solution(&conn, id)
    }

    fn update_solution(&self, solution: &Solution) -> Result<Solution> {
        if solution.name.trim().is_empty() {
            return Err(StorageError::validation("solution name is required"));
        }
        let conn = self.lock_conn()?;
        let stored = load_solution(&conn, &solution.id)?;
        if !stored.status.is_editable() {
            warn!(id = %solution.id, status = stored.status.as_str(), "refusing to edit solution");
            return Err(StorageError::conflict(format!(
                "solution {} is {} and cannot be edited",
                solution.id,
                stored.status.as_str()
            )));
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE solutions SET name = ?1, description = ?2, categories = ?3, parameters = ?4, \
             calculations = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                solution.name.trim(),
                solution.description,
                serde_json::to_string(&solution.categories)?,
                serde_json::to_string(&solution.parameters)?,
                serde_json::to_string(&solution.calculations)?,
                format_timestamp(&Utc::now()),
                solution.id.as_str(),
            ],
        )?;
        link_products(&tx, &solution.id, &stored.company_id, &solution.product_ids)?;
        tx.commit()?;
        debug!(id = %solution.id, "solution updated");
        load_solution(&conn, &solution.id)
    }

    fn delete_solution(&self, id: &SolutionId) -> Result<()> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM solutions WHERE id = ?1", params![id.as_str()])?;
        if deleted == 0 {
            return Err(StorageError::not_found("solution", id.as_str()));
        }
        info!(id = %id, "solution deleted");
        Ok(())
    }

    fn submit_solution_for_review(&self, id: &SolutionId) -> Result<Solution> {
        let conn = self.lock_conn()?;
        let mut solution = load_solution(&conn, id)?;
        if !solution.status.is_editable() {
            return Err(StorageError::conflict(format!(
                "solution {id} is already {}",
                solution.status.as_str()
            )));
        }

        // Stored statuses are whatever the client saved; evaluate again.
        let parameters = ParameterStore::from_parameters(solution.parameters.clone())
            .map_err(|e| StorageError::validation(e.to_string()))?;
        let report = self.recalculator.run(&parameters, &mut solution.calculations);
        if !report.is_clean() {
            let failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
            warn!(id = %id, failed = failed.len(), "refusing to submit solution with errors");
            return Err(StorageError::validation(format!(
                "calculations with errors: {}",
                failed.join(", ")
            )));
        }

        conn.execute(
            "UPDATE solutions SET status = ?1, calculations = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                SolutionStatus::PendingReview.as_str(),
                serde_json::to_string(&solution.calculations)?,
                format_timestamp(&Utc::now()),
                id.as_str(),
            ],
        )?;
        info!(id = %id, "solution submitted for review");
        load_solution(&conn, id)
    }

    fn review_solution(&self, id: &SolutionId, approve: bool) -> Result<Solution> {
        let conn = self.lock_conn()?;
        let solution = load_solution(&conn, id)?;
        if solution.status != SolutionStatus::PendingReview {
            return Err(StorageError::conflict(format!(
                "solution {id} is not pending review"
            )));
        }
        let status = if approve {
            SolutionStatus::Approved
        } else {
            SolutionStatus::Rejected
        };
        set_solution_status(&conn, id, status)?;
        info!(id = %id, status = status.as_str(), "solution reviewed");
        load_solution(&conn, id)
    }

    fn upsert_product(&self, product: &Product) -> Result<()> {
        if product.name.trim().is_empty() {
            return Err(StorageError::validation("product name is required"));
        }
        if let Some(ppue) = product.ppue {
            if !ppue.is_finite() || ppue < 1.0 {
                return Err(StorageError::validation(format!(
                    "pPUE must be at least 1.0, got {ppue}"
                )));
            }
        }
        let conn = self.lock_conn()?;
        ensure_company(&conn, &product.company_id)?;
        if let Some(solution_id) = &product.solution_id {
            let solution = load_solution(&conn, solution_id)?;
            if solution.company_id != product.company_id {
                return Err(StorageError::validation(format!(
                    "solution {solution_id} belongs to another company"
                )));
            }
        }
        conn.execute(
            &format!(
                "INSERT INTO products ({PRODUCT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(id) DO UPDATE SET company_id = excluded.company_id, \
                 name = excluded.name, manufacturer = excluded.manufacturer, \
                 description = excluded.description, ppue = excluded.ppue, \
                 solution_id = excluded.solution_id"
            ),
            params![
                product.id.as_str(),
                product.company_id.as_str(),
                product.name.trim(),
                product.manufacturer,
                product.description,
                product.ppue,
                product.solution_id.as_ref().map(SolutionId::as_str),
            ],
        )?;
        debug!(id = %product.id, "product saved");
        Ok(())
    }

    fn list_products(&self, company_id: &CompanyId) -> Result<Vec<Product>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE company_id = ?1 ORDER BY lower(name), id"
        ))?;
        let products = stmt
            .query_map(params![company_id.as_str()], scan_product)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Address, Calculation, CalculationStatus, Category, Parameter,
    };
    use pretty_assertions::assert_eq;

    fn store_with_company() -> (SqliteStorage, Company) {
        let store = SqliteStorage::open_in_memory().unwrap();
        let company = Company::new("Nordic Racks", "ops@nordicracks.example");
        store.create_company(&company).unwrap();
        (store, company)
    }

    fn new_user(company: &Company, name: &str, email: &str, role: UserRole) -> NewUser {
        NewUser {
            company_id: company.id.clone(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            job_title: None,
        }
    }

    #[test]
    fn test_company_round_trip_and_update() {
        let (store, mut company) = store_with_company();
        assert_eq!(store.get_company_details(&company.id).unwrap(), company);

        company.phone = Some("+46 8 123 456".to_string());
        company.address = Some(Address {
            line1: "Kungsgatan 1".to_string(),
            line2: None,
            city: "Stockholm".to_string(),
            postal_code: "111 43".to_string(),
            country: "SE".to_string(),
        });
        company.billing.billing_email = "billing@nordicracks.example".to_string();
        company.billing.tax_number = Some("SE556677889901".to_string());

        let updated = store.update_company_details(&company).unwrap();
        assert_eq!(updated.address, company.address);
        assert_eq!(updated.billing, company.billing);
        assert!(updated.updated_at >= company.updated_at);

        company.billing.billing_email = "nope".to_string();
        assert!(matches!(
            store.update_company_details(&company),
            Err(StorageError::Validation { .. })
        ));

        let missing = CompanyId("cmp-missing".to_string());
        assert!(store.get_company_details(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_user_email_is_unique_ignoring_case() {
        let (store, company) = store_with_company();
        store
            .create_user(new_user(&company, "Ada", "ada@example.com", UserRole::Admin))
            .unwrap();
        assert!(matches!(
            store.create_user(new_user(&company, "Ada 2", "ADA@example.com", UserRole::Member)),
            Err(StorageError::Conflict { .. })
        ));

        let grace = store
            .create_user(new_user(&company, "Grace", "grace@example.com", UserRole::Member))
            .unwrap();
        let err = store
            .update_user_profile(
                &grace.id,
                UserProfileUpdate {
                    email: Some("Ada@Example.com".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        // Changing only the case of one's own email is fine.
        let updated = store
            .update_user_profile(
                &grace.id,
                UserProfileUpdate {
                    email: Some("Grace@example.com".to_string()),
                    job_title: Some(Some("Facilities lead".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.email, "Grace@example.com");
        assert_eq!(updated.job_title.as_deref(), Some("Facilities lead"));
    }

    #[test]
    fn test_users_query_search_filter_sort() {
        let (store, company) = store_with_company();
        for (name, email, role) in [
            ("Charlie", "charlie@example.com", UserRole::Viewer),
            ("ada", "ada@example.com", UserRole::Member),
            ("Bob", "bob@corp.example", UserRole::Admin),
        ] {
            store.create_user(new_user(&company, name, email, role)).unwrap();
        }
        let names = |users: Vec<User>| users.into_iter().map(|u| u.name).collect::<Vec<_>>();

        let all = store
            .get_users_by_company(&company.id, &UserQuery::default())
            .unwrap();
        assert_eq!(names(all), vec!["ada", "Bob", "Charlie"]);

        let by_role = store
            .get_users_by_company(
                &company.id,
                &UserQuery::default().sorted_by(UserSortField::Role, SortDirection::Ascending),
            )
            .unwrap();
        assert_eq!(names(by_role), vec!["Bob", "ada", "Charlie"]);

        let searched = store
            .get_users_by_company(&company.id, &UserQuery::search("EXAMPLE.COM"))
            .unwrap();
        assert_eq!(names(searched), vec!["ada", "Charlie"]);

        let admins = store
            .get_users_by_company(&company.id, &UserQuery::default().with_role(UserRole::Admin))
            .unwrap();
        assert_eq!(names(admins), vec!["Bob"]);

        let desc = store
            .get_users_by_company(
                &company.id,
                &UserQuery::default().sorted_by(UserSortField::Email, SortDirection::Descending),
            )
            .unwrap();
        assert_eq!(names(desc), vec!["Charlie", "Bob", "ada"]);
    }

    #[test]
    fn test_delete_user() {
        let (store, company) = store_with_company();
        let user = store
            .create_user(new_user(&company, "Ada", "ada@example.com", UserRole::Member))
            .unwrap();
        store.delete_user(&user.id).unwrap();
        assert!(store.delete_user(&user.id).unwrap_err().is_not_found());
    }

    fn sample_solution(company: &Company) -> Solution {
        let energy = Category::new("Energy", "#22C55E");
        let mut solution = Solution::new(company.id.clone(), "Rear door cooling");
        solution.categories = vec![energy.clone()];
        solution.parameters = vec![Parameter::new("it_load_kw", 400.0, energy.clone())];
        let mut calc = Calculation::new("cooling_kw", "it_load_kw * 0.25", energy);
        calc.status = CalculationStatus::Valid;
        calc.result = Some(100.0);
        calc.level = 1;
        solution.calculations = vec![calc];
        solution
    }

    #[test]
    fn test_solution_round_trip() {
        let (store, company) = store_with_company();
        let solution = sample_solution(&company);
        store.create_solution(&solution).unwrap();

        assert_eq!(store.get_solution(&solution.id).unwrap(), solution);
        assert_eq!(store.get_solutions(&company.id).unwrap().len(), 1);

        store.delete_solution(&solution.id).unwrap();
        assert!(store.get_solution(&solution.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_new_solutions_start_as_draft() {
        let (store, company) = store_with_company();
        let mut solution = sample_solution(&company);
        solution.status = SolutionStatus::Approved;
        assert!(matches!(
            store.create_solution(&solution),
            Err(StorageError::Validation { .. })
        ));
        assert!(store.get_solution(&solution.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_submit_evaluates_stored_formulas() {
        let (store, company) = store_with_company();
        let mut solution = sample_solution(&company);
        // Saved as valid, but the formula cannot evaluate.
        solution.calculations[0].formula = "it_load_kw / 0 + missing".to_string();
        solution.calculations[0].status = CalculationStatus::Valid;
        store.create_solution(&solution).unwrap();

        let err = store.submit_solution_for_review(&solution.id).unwrap_err();
        assert_eq!(err.to_string(), "validation error: calculations with errors: cooling_kw");
        assert_eq!(
            store.get_solution(&solution.id).unwrap().status,
            SolutionStatus::Draft
        );

        // Stored results are replaced by the evaluated ones on submit.
        solution.calculations[0].formula = "it_load_kw * 0.5".to_string();
        store.update_solution(&solution).unwrap();
        let submitted = store.submit_solution_for_review(&solution.id).unwrap();
        assert_eq!(submitted.calculations[0].result, Some(200.0));
        assert_eq!(submitted.calculations[0].status, CalculationStatus::Valid);
    }

    #[test]
    fn test_review_workflow() {
        let (store, company) = store_with_company();
        let mut solution = sample_solution(&company);
        solution.calculations[0].formula = "it_load_kw * ".to_string();
        store.create_solution(&solution).unwrap();

        assert!(matches!(
            store.submit_solution_for_review(&solution.id),
            Err(StorageError::Validation { .. })
        ));

        solution.calculations[0].formula = "it_load_kw * 0.25".to_string();
        store.update_solution(&solution).unwrap();
        let submitted = store.submit_solution_for_review(&solution.id).unwrap();
        assert_eq!(submitted.status, SolutionStatus::PendingReview);

        // Under review: no edits, no second submit.
        assert!(matches!(
            store.update_solution(&solution),
            Err(StorageError::Conflict { .. })
        ));
        assert!(store.submit_solution_for_review(&solution.id).is_err());

        let rejected = store.review_solution(&solution.id, false).unwrap();
        assert_eq!(rejected.status, SolutionStatus::Rejected);
        assert!(store.update_solution(&solution).is_ok());
        store.submit_solution_for_review(&solution.id).unwrap();
        let approved = store.review_solution(&solution.id, true).unwrap();
        assert_eq!(approved.status, SolutionStatus::Approved);
        assert!(store.review_solution(&solution.id, true).is_err());
    }

    #[test]
    fn test_products() {
        let (store, company) = store_with_company();
        let solution = sample_solution(&company);
        store.create_solution(&solution).unwrap();

        let mut product = Product {
            id: ProductId::generate("RDHx 40"),
            company_id: company.id.clone(),
            name: "RDHx 40".to_string(),
            manufacturer: "CoolCo".to_string(),
            description: String::new(),
            ppue: Some(1.08),
            solution_id: Some(solution.id.clone()),
        };
        store.upsert_product(&product).unwrap();

        product.description = "40 kW rear door heat exchanger".to_string();
        store.upsert_product(&product).unwrap();
        assert_eq!(store.list_products(&company.id).unwrap(), vec![product.clone()]);

        product.ppue = Some(0.8);
        assert!(matches!(
            store.upsert_product(&product),
            Err(StorageError::Validation { .. })
        ));

        // Deleting the solution unlinks the product.
        store.delete_solution(&solution.id).unwrap();
        assert_eq!(store.list_products(&company.id).unwrap()[0].solution_id, None);
    }

    fn product(company: &Company, name: &str, solution_id: Option<&SolutionId>) -> Product {
        Product {
            id: ProductId::generate(name),
            company_id: company.id.clone(),
            name: name.to_string(),
            manufacturer: "CoolCo".to_string(),
            description: String::new(),
            ppue: Some(1.1),
            solution_id: solution_id.cloned(),
        }
    }

    #[test]
    fn test_solution_products_follow_product_links() {
        let (store, company) = store_with_company();
        let mut solution = sample_solution(&company);
        store.create_solution(&solution).unwrap();

        // Linking from the product side shows up on the solution.
        let door = product(&company, "RDHx 40", Some(&solution.id));
        let chiller = product(&company, "Free chiller", None);
        store.upsert_product(&door).unwrap();
        store.upsert_product(&chiller).unwrap();
        assert_eq!(
            store.get_solution(&solution.id).unwrap().product_ids,
            vec![door.id.clone()]
        );

        // Linking from the solution side moves the products.
        solution.product_ids = vec![chiller.id.clone()];
        let updated = store.update_solution(&solution).unwrap();
        assert_eq!(updated.product_ids, vec![chiller.id.clone()]);
        let linked: Vec<Option<SolutionId>> = store
            .list_products(&company.id)
            .unwrap()
            .into_iter()
            .map(|p| p.solution_id)
            .collect();
        assert_eq!(linked, vec![Some(solution.id.clone()), None]);

        solution.product_ids.clear();
        assert!(store.update_solution(&solution).unwrap().product_ids.is_empty());

        // Unknown products and products owned by another solution are refused.
        solution.product_ids = vec![ProductId("prd-missing".to_string())];
        assert!(store.update_solution(&solution).unwrap_err().is_not_found());

        let other = Solution::new(company.id.clone(), "Immersion tanks");
        store.create_solution(&other).unwrap();
        let tank = product(&company, "Tank 12", Some(&other.id));
        store.upsert_product(&tank).unwrap();
        solution.product_ids = vec![tank.id.clone()];
        assert!(matches!(
            store.update_solution(&solution),
            Err(StorageError::Conflict { .. })
        ));
        assert!(store.get_solution(&solution.id).unwrap().product_ids.is_empty());
    }

    #[test]
    fn test_create_company_checks_billing_email() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut company = Company::new("Nordic Racks", "ops@nordicracks.example");
        company.billing.billing_email = "billing-at-nordicracks".to_string();
        assert!(matches!(
            store.create_company(&company),
            Err(StorageError::Validation { .. })
        ));
    }

    #[test]
    fn test_from_config_uses_path_and_formula_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.database_path = dir.path().join("configured.db");
        config.formula.max_length = 10;

        let store = SqliteStorage::from_config(&config).unwrap();
        assert!(config.storage.database_path.exists());

        let company = Company::new("Nordic Racks", "");
        store.create_company(&company).unwrap();
        let mut solution = sample_solution(&company);
        solution.calculations[0].formula = "it_load_kw * 0.25 * 1".to_string();
        store.create_solution(&solution).unwrap();
        assert!(matches!(
            store.submit_solution_for_review(&solution.id),
            Err(StorageError::Validation { .. })
        ));
    }

    #[test]
    fn test_open_file_database_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solutions.db");
        let company = Company::new("Nordic Racks", "");
        {
            let store = SqliteStorage::open(&path).unwrap();
            store.create_company(&company).unwrap();
        }
        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(store.get_company_details(&company.id).unwrap().name, "Nordic Racks");
    }
}
