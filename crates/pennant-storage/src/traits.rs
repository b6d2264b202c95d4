//! Repository traits for Pennant.
//!
//! The evaluation core consumes a read-only view over flags and segments;
//! evaluations and users are written through the evaluation pipeline. All
//! traits are implemented for PostgreSQL and SQLite, and the evaluation
//! repository additionally by the Redis write-through cache decorator.

use std::future::Future;

use pennant_core::{Evaluation, EvaluationId, EvaluationList, Flag, FlagId, FlagKey, Segment, User, UserContext};

use crate::error::StorageResult;

/// A page of flags plus the total number of matches.
#[derive(Debug, Clone)]
pub struct FlagResults {
    pub flags: Vec<Flag>,
    pub total: i64,
}

/// A page of evaluations plus the total number of matches.
#[derive(Debug, Clone)]
pub struct EvaluationResults {
    pub evaluations: EvaluationList,
    pub total: i64,
}

/// A page of users plus the total number of matches.
#[derive(Debug, Clone)]
pub struct UserResults {
    pub users: Vec<User>,
    pub total: i64,
}

/// Read-only repository over flags.
pub trait FlagRepository: Send + Sync {
    /// Gets a flag by its human key.
    fn find_by_key(
        &self,
        key: &FlagKey,
    ) -> impl Future<Output = StorageResult<Option<Flag>>> + Send;

    /// Lists flags in canonical (key) order, optionally filtered by a key
    /// substring.
    fn find_all(
        &self,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> impl Future<Output = StorageResult<FlagResults>> + Send;
}

/// Read-only repository over segments.
pub trait SegmentRepository: Send + Sync {
    /// Lists all segments.
    fn find_all(
        &self,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> impl Future<Output = StorageResult<Vec<Segment>>> + Send;
}

/// Repository recording the latest evaluation per (user, flag).
///
/// The store maintains a unique index over (user_id, flag_id); the replace
/// operations upsert against it.
pub trait EvaluationRepository: Send + Sync {
    /// Returns all evaluations for a user, optionally filtered by a flag-key
    /// substring.
    fn find_all_by_user_id(
        &self,
        user_id: &str,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> impl Future<Output = StorageResult<EvaluationResults>> + Send;

    /// Returns the evaluation for a (user, flag) pair, if any.
    fn find_by_user_id_and_flag_id(
        &self,
        user_id: &str,
        flag_id: FlagId,
    ) -> impl Future<Output = StorageResult<Option<Evaluation>>> + Send;

    /// Returns the evaluation recorded for a request hash and flag key, if
    /// any. Absence is a cache/store miss, not an error. Records computed
    /// against a flag version other than the current one (or for a deleted
    /// flag) read as a miss.
    fn find_by_req_hash_and_flag_key(
        &self,
        req_hash: &str,
        flag_key: &FlagKey,
    ) -> impl Future<Output = StorageResult<Option<Evaluation>>> + Send;

    /// Returns all evaluations recorded for a request hash. The batch is
    /// returned only when it is reusable as a whole: it must cover every
    /// flag and every record must match its flag's current version;
    /// otherwise the result is `None` and the caller recomputes.
    fn find_all_by_req_hash(
        &self,
        req_hash: &str,
    ) -> impl Future<Output = StorageResult<Option<EvaluationList>>> + Send;

    /// Upserts one evaluation by (user_id, flag_id).
    fn replace_one(
        &self,
        user_id: &str,
        eval: &Evaluation,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Upserts a batch of evaluations by (user_id, flag_id), overwriting
    /// each record's request hash with `req_hash`. Evaluations outside the
    /// batch are left untouched.
    fn replace_all(
        &self,
        user_id: &str,
        req_hash: &str,
        evals: &EvaluationList,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Deletes all evaluations for a user.
    fn delete_all_by_user_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Deletes an evaluation by its ID.
    fn delete_by_id(
        &self,
        id: EvaluationId,
    ) -> impl Future<Output = StorageResult<()>> + Send;
}

/// Repository over persisted users and their contexts.
pub trait UserRepository: Send + Sync {
    /// Lists users, optionally filtered by ID.
    fn find_all(
        &self,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> impl Future<Output = StorageResult<UserResults>> + Send;

    /// Creates or updates a user with the given context.
    fn replace(
        &self,
        user_id: &str,
        context: &UserContext,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Deletes a user.
    fn delete(&self, user_id: &str) -> impl Future<Output = StorageResult<()>> + Send;
}
