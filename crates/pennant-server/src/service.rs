//! The flag evaluation service.
//!
//! Orchestrates the evaluation pipeline: cache probe, prior-evaluation
//! reuse, flag evaluation against pre-resolved segments, and persistence of
//! the outcome.

use std::collections::HashMap;

use pennant_core::{
    segment_table, Evaluation, EvaluationRequest, EvaluationResponse, EvaluationsResponse,
    Evaluator, Flag, FlagId, FlagKey, ValidationError,
};
use pennant_storage::{
    EvaluationRepository, FlagRepository, SegmentRepository, UserRepository,
};

use crate::error::ApiError;

/// The evaluation service over a set of repositories.
///
/// `E` is typically the Redis cache decorator wrapped around the durable
/// evaluation store; the service itself is oblivious to the tiering.
/// Cancellation is drop-based: dropping a request future abandons the
/// pipeline before the persistence step runs.
#[derive(Debug, Clone)]
pub struct FlagService<F, S, E, U> {
    flags: F,
    segments: S,
    evaluations: E,
    users: U,
}

impl<F, S, E, U> FlagService<F, S, E, U>
where
    F: FlagRepository,
    S: SegmentRepository,
    E: EvaluationRepository,
    U: UserRepository,
{
    /// Creates a new flag service.
    pub fn new(flags: F, segments: S, evaluations: E, users: U) -> Self {
        Self {
            flags,
            segments,
            evaluations,
            users,
        }
    }

    /// Evaluates a single flag for a user.
    ///
    /// Debug requests bypass the cache probe and prior-evaluation reuse (a
    /// trace must always be produced), skip persistence, and echo the user
    /// context back on the response.
    #[tracing::instrument(skip_all, fields(flag_key = %flag_key, user_id = %req.user_id))]
    pub async fn evaluate(
        &self,
        flag_key: &FlagKey,
        req: &EvaluationRequest,
    ) -> Result<EvaluationResponse, ApiError> {
        if req.user_id.is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        let debug = req.is_debug();
        let req_hash = req.fingerprint();

        if !debug {
            if let Some(eval) = self
                .evaluations
                .find_by_req_hash_and_flag_key(&req_hash, flag_key)
                .await?
            {
                tracing::debug!("evaluation cache hit");
                return Ok(EvaluationResponse {
                    evaluation: eval,
                    user_context: None,
                });
            }
        }

        let flag = self
            .flags
            .find_by_key(flag_key)
            .await?
            .ok_or_else(|| ApiError::FlagNotFound(flag_key.clone()))?;

        let mut reused = None;
        if !debug {
            if let Some(prior) = self
                .evaluations
                .find_by_user_id_and_flag_id(&req.user_id, flag.id)
                .await?
            {
                if prior.flag_version == flag.version && prior.request_hash == req_hash {
                    reused = Some(prior);
                }
            }
        }

        let eval = match reused {
            Some(eval) => eval,
            None => {
                let segments = segment_table(self.segments.find_all(None, None).await?);
                let context = req.context_with_id();
                let outcome = Evaluator::new(&segments).evaluate(&flag, &context, debug)?;

                let mut eval = Evaluation::for_flag(&flag, &req_hash);
                eval.value = outcome.answer;
                if debug {
                    eval.stack_trace = Some(outcome.stack);
                }
                eval
            }
        };

        if !debug {
            self.users.replace(&req.user_id, &req.user_context).await?;
            self.evaluations.replace_one(&req.user_id, &eval).await?;
        }

        Ok(EvaluationResponse {
            evaluation: eval,
            user_context: debug.then(|| req.user_context.clone()),
        })
    }

    /// Evaluates every flag for a user.
    ///
    /// One failing flag does not poison the batch: its evaluation carries
    /// the error string and a null value while the rest proceed.
    #[tracing::instrument(skip_all, fields(user_id = %req.user_id))]
    pub async fn evaluate_all(
        &self,
        req: &EvaluationRequest,
    ) -> Result<EvaluationsResponse, ApiError> {
        if req.user_id.is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        let debug = req.is_debug();
        let req_hash = req.fingerprint();

        if !debug {
            if let Some(evaluations) = self.evaluations.find_all_by_req_hash(&req_hash).await? {
                tracing::debug!("evaluation batch cache hit");
                return Ok(EvaluationsResponse {
                    evaluations,
                    user_context: None,
                });
            }
        }

        let prior = self
            .evaluations
            .find_all_by_user_id(&req.user_id, None, None, None)
            .await?;
        let flags = self.flags.find_all(None, None, None).await?;
        let segments = segment_table(self.segments.find_all(None, None).await?);

        let reusable = if debug {
            HashMap::new()
        } else {
            reusable_evaluations(&req_hash, &flags.flags, prior.evaluations)
        };

        let context = req.context_with_id();
        let evaluator = Evaluator::new(&segments);

        let mut evaluations = Vec::with_capacity(flags.flags.len());
        for flag in &flags.flags {
            if let Some(eval) = reusable.get(&flag.id) {
                evaluations.push(eval.clone());
                continue;
            }

            let mut eval = Evaluation::for_flag(flag, &req_hash);
            match evaluator.evaluate(flag, &context, debug) {
                Ok(outcome) => {
                    eval.value = outcome.answer;
                    if debug {
                        eval.stack_trace = Some(outcome.stack);
                    }
                }
                Err(err) => {
                    tracing::warn!(flag_key = %flag.key, error = %err, "flag evaluation failed");
                    eval.error = Some(err.to_string());
                }
            }
            evaluations.push(eval);
        }

        if !debug {
            self.users.replace(&req.user_id, &req.user_context).await?;
            self.evaluations
                .replace_all(&req.user_id, &req_hash, &evaluations)
                .await?;
        }

        Ok(EvaluationsResponse {
            evaluations,
            user_context: debug.then(|| req.user_context.clone()),
        })
    }
}

// Prior evaluations that can be served as-is: the flag still exists at the
// version the record was computed against, and the user context has not
// changed since.
fn reusable_evaluations(
    req_hash: &str,
    flags: &[Flag],
    prior: Vec<Evaluation>,
) -> HashMap<FlagId, Evaluation> {
    let mut by_flag: HashMap<FlagId, Evaluation> =
        prior.into_iter().map(|e| (e.flag_id, e)).collect();
    by_flag.retain(|flag_id, eval| {
        eval.request_hash == req_hash
            && flags
                .iter()
                .any(|f| f.id == *flag_id && f.version == eval.flag_version)
    });
    by_flag
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use pennant_core::{
        Constraint, Distribution, EvaluationList, FlagRule, Segment, User, UserContext, Value,
        Variant,
    };
    use pennant_storage::{EvaluationResults, FlagResults, StorageResult, UserResults};

    use super::*;

    type SharedFlags = Arc<Mutex<Vec<Flag>>>;

    #[derive(Clone, Default)]
    struct InMemoryFlags(SharedFlags);

    impl FlagRepository for InMemoryFlags {
        async fn find_by_key(&self, key: &FlagKey) -> StorageResult<Option<Flag>> {
            Ok(self.0.lock().unwrap().iter().find(|f| &f.key == key).cloned())
        }

        async fn find_all(
            &self,
            _search: Option<&str>,
            _offset: Option<i64>,
            _limit: Option<i64>,
        ) -> StorageResult<FlagResults> {
            let mut flags = self.0.lock().unwrap().clone();
            flags.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
            let total = flags.len() as i64;
            Ok(FlagResults { flags, total })
        }
    }

    #[derive(Clone, Default)]
    struct InMemorySegments(Arc<Mutex<Vec<Segment>>>);

    impl SegmentRepository for InMemorySegments {
        async fn find_all(
            &self,
            _offset: Option<i64>,
            _limit: Option<i64>,
        ) -> StorageResult<Vec<Segment>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    /// Store fake mirroring the SQL repositories, including the
    /// version-aware req-hash finders.
    #[derive(Clone, Default)]
    struct InMemoryEvaluations {
        rows: Arc<Mutex<Vec<(String, Evaluation)>>>,
        flags: SharedFlags,
        replace_one_calls: Arc<AtomicUsize>,
        replace_all_calls: Arc<AtomicUsize>,
    }

    impl InMemoryEvaluations {
        fn version_current(&self, eval: &Evaluation) -> bool {
            self.flags
                .lock()
                .unwrap()
                .iter()
                .any(|f| f.id == eval.flag_id && f.version == eval.flag_version)
        }

        fn upsert(&self, user_id: &str, eval: Evaluation) {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|(u, e)| !(u == user_id && e.flag_id == eval.flag_id));
            rows.push((user_id.to_string(), eval));
        }

        fn snapshot(&self) -> Vec<(String, Evaluation)> {
            self.rows.lock().unwrap().clone()
        }
    }

    impl EvaluationRepository for InMemoryEvaluations {
        async fn find_all_by_user_id(
            &self,
            user_id: &str,
            _search: Option<&str>,
            _offset: Option<i64>,
            _limit: Option<i64>,
        ) -> StorageResult<EvaluationResults> {
            let evaluations: EvaluationList = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == user_id)
                .map(|(_, e)| e.clone())
                .collect();
            let total = evaluations.len() as i64;
            Ok(EvaluationResults { evaluations, total })
        }

        async fn find_by_user_id_and_flag_id(
            &self,
            user_id: &str,
            flag_id: FlagId,
        ) -> StorageResult<Option<Evaluation>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|(u, e)| u == user_id && e.flag_id == flag_id)
                .map(|(_, e)| e.clone()))
        }

        async fn find_by_req_hash_and_flag_key(
            &self,
            req_hash: &str,
            flag_key: &FlagKey,
        ) -> StorageResult<Option<Evaluation>> {
            let candidate = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.clone())
                .find(|e| e.request_hash == req_hash && &e.flag_key == flag_key);
            Ok(candidate.filter(|e| self.version_current(e)))
        }

        async fn find_all_by_req_hash(
            &self,
            req_hash: &str,
        ) -> StorageResult<Option<EvaluationList>> {
            let mut evals: EvaluationList = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| e.request_hash == req_hash)
                .map(|(_, e)| e.clone())
                .collect();
            evals.sort_by(|a, b| a.flag_key.as_str().cmp(b.flag_key.as_str()));

            let total_flags = self.flags.lock().unwrap().len();
            if evals.is_empty()
                || evals.len() != total_flags
                || evals.iter().any(|e| !self.version_current(e))
            {
                return Ok(None);
            }
            Ok(Some(evals))
        }

        async fn replace_one(&self, user_id: &str, eval: &Evaluation) -> StorageResult<()> {
            self.replace_one_calls.fetch_add(1, Ordering::SeqCst);
            self.upsert(user_id, eval.clone());
            Ok(())
        }

        async fn replace_all(
            &self,
            user_id: &str,
            req_hash: &str,
            evals: &EvaluationList,
        ) -> StorageResult<()> {
            self.replace_all_calls.fetch_add(1, Ordering::SeqCst);
            for eval in evals {
                let mut eval = eval.clone();
                eval.request_hash = req_hash.to_string();
                self.upsert(user_id, eval);
            }
            Ok(())
        }

        async fn delete_all_by_user_id(&self, user_id: &str) -> StorageResult<()> {
            self.rows.lock().unwrap().retain(|(u, _)| u != user_id);
            Ok(())
        }

        async fn delete_by_id(&self, id: pennant_core::EvaluationId) -> StorageResult<()> {
            self.rows.lock().unwrap().retain(|(_, e)| e.id != id);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct InMemoryUsers {
        rows: Arc<Mutex<Vec<User>>>,
        replace_calls: Arc<AtomicUsize>,
    }

    impl UserRepository for InMemoryUsers {
        async fn find_all(
            &self,
            _search: Option<&str>,
            _offset: Option<i64>,
            _limit: Option<i64>,
        ) -> StorageResult<UserResults> {
            let users = self.rows.lock().unwrap().clone();
            let total = users.len() as i64;
            Ok(UserResults { users, total })
        }

        async fn replace(&self, user_id: &str, context: &UserContext) -> StorageResult<()> {
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|u| u.id != user_id);
            rows.push(User {
                id: user_id.to_string(),
                context: context.clone(),
                updated_at: Utc::now(),
            });
            Ok(())
        }

        async fn delete(&self, user_id: &str) -> StorageResult<()> {
            self.rows.lock().unwrap().retain(|u| u.id != user_id);
            Ok(())
        }
    }

    struct Harness {
        flags: SharedFlags,
        evaluations: InMemoryEvaluations,
        users: InMemoryUsers,
        service: FlagService<InMemoryFlags, InMemorySegments, InMemoryEvaluations, InMemoryUsers>,
    }

    fn harness(flags: Vec<Flag>) -> Harness {
        let shared: SharedFlags = Arc::new(Mutex::new(flags));
        let evaluations = InMemoryEvaluations {
            flags: shared.clone(),
            ..Default::default()
        };
        let users = InMemoryUsers::default();
        let service = FlagService::new(
            InMemoryFlags(shared.clone()),
            InMemorySegments::default(),
            evaluations.clone(),
            users.clone(),
        );
        Harness {
            flags: shared,
            evaluations,
            users,
            service,
        }
    }

    /// Flag `dark-mode` v1, enabled, one rule `country ONE_OF [US, CA]`
    /// fully distributed onto a `true` variant.
    fn dark_mode_flag() -> Flag {
        let variant = Variant::new(true);
        let variant_id = variant.id;
        Flag::new("dark-mode", "Dark Mode")
            .with_variant(variant)
            .with_rule(
                FlagRule::new(vec![Distribution::new(variant_id, 100)]).with_constraint(
                    Constraint::one_of("country", vec!["US".to_string(), "CA".to_string()]),
                ),
            )
    }

    fn us_request() -> EvaluationRequest {
        EvaluationRequest::new("u1").set("country", "US")
    }

    #[tokio::test]
    async fn test_evaluate_matches_and_persists() {
        let h = harness(vec![dark_mode_flag()]);
        let req = us_request();

        let resp = h
            .service
            .evaluate(&FlagKey::new("dark-mode"), &req)
            .await
            .unwrap();

        assert_eq!(resp.evaluation.value, Some(Value::Bool(true)));
        assert_eq!(resp.evaluation.flag_version, 1);
        assert_eq!(resp.evaluation.request_hash, req.fingerprint());
        assert!(resp.user_context.is_none());

        // One evaluation and one user persisted.
        assert_eq!(h.evaluations.snapshot().len(), 1);
        assert_eq!(h.users.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evaluate_unknown_flag_is_not_found() {
        let h = harness(Vec::new());
        let err = h
            .service
            .evaluate(&FlagKey::new("ghost"), &us_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::FlagNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_user_id_is_rejected() {
        let h = harness(vec![dark_mode_flag()]);
        let req = EvaluationRequest::new("");
        let err = h
            .service
            .evaluate(&FlagKey::new("dark-mode"), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = h.service.evaluate_all(&req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_repeated_evaluate_hits_the_cache() {
        let h = harness(vec![dark_mode_flag()]);
        let key = FlagKey::new("dark-mode");
        let req = us_request();

        let first = h.service.evaluate(&key, &req).await.unwrap();
        let second = h.service.evaluate(&key, &req).await.unwrap();

        assert_eq!(second.evaluation.id, first.evaluation.id);
        assert_eq!(second.evaluation.value, first.evaluation.value);
        // The second call was served from the req-hash probe: nothing was
        // re-persisted.
        assert_eq!(h.evaluations.replace_one_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.users.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_version_bump_invalidates_reuse() {
        let h = harness(vec![dark_mode_flag()]);
        let key = FlagKey::new("dark-mode");
        let req = us_request();

        let first = h.service.evaluate(&key, &req).await.unwrap();
        assert_eq!(first.evaluation.flag_version, 1);

        // Admin mutates the flag.
        h.flags.lock().unwrap()[0].bump_version();

        let second = h.service.evaluate(&key, &req).await.unwrap();
        assert_eq!(second.evaluation.flag_version, 2);
        assert_eq!(second.evaluation.value, Some(Value::Bool(true)));
        // Recomputed, not reused.
        assert_eq!(h.evaluations.replace_one_calls.load(Ordering::SeqCst), 2);

        let stored = h.evaluations.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1.flag_version, 2);
    }

    #[tokio::test]
    async fn test_debug_bypasses_cache_and_persistence() {
        let h = harness(vec![dark_mode_flag()]);
        let key = FlagKey::new("dark-mode");

        h.service.evaluate(&key, &us_request()).await.unwrap();
        let stored_before = h.evaluations.snapshot();

        let debug_req = us_request().with_debug();
        let resp = h.service.evaluate(&key, &debug_req).await.unwrap();

        let stack = resp.evaluation.stack_trace.expect("debug stack expected");
        assert!(!stack.is_empty());
        assert_eq!(resp.user_context, Some(debug_req.user_context.clone()));
        assert_eq!(resp.evaluation.value, Some(Value::Bool(true)));

        // The store was not touched by the debug request.
        assert_eq!(h.evaluations.snapshot(), stored_before);
        assert_eq!(h.evaluations.replace_one_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.users.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evaluate_all_isolates_a_bad_flag() {
        let working = dark_mode_flag();
        let broken = {
            let variant = Variant::new("x");
            let variant_id = variant.id;
            Flag::new("welcome-banner", "Welcome Banner")
                .with_variant(variant)
                .with_rule(
                    FlagRule::new(vec![Distribution::new(variant_id, 100)])
                        .with_constraint(Constraint::matches_regex("email", "[unclosed")),
                )
        };
        let h = harness(vec![working, broken]);

        let req = us_request().set("email", "ana@nubster.io");
        let resp = h.service.evaluate_all(&req).await.unwrap();

        assert_eq!(resp.evaluations.len(), 2);
        let good = &resp.evaluations[0];
        assert_eq!(good.flag_key.as_str(), "dark-mode");
        assert_eq!(good.value, Some(Value::Bool(true)));
        assert!(good.error.is_none());

        let bad = &resp.evaluations[1];
        assert_eq!(bad.flag_key.as_str(), "welcome-banner");
        assert!(bad.value.is_none());
        assert!(bad
            .error
            .as_deref()
            .is_some_and(|e| e.contains("regular expression")));

        // The whole batch, errored flag included, was persisted once.
        assert_eq!(h.evaluations.replace_all_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.evaluations.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_evaluate_all_batch_is_cached() {
        let h = harness(vec![dark_mode_flag()]);
        let req = us_request();

        let first = h.service.evaluate_all(&req).await.unwrap();
        let second = h.service.evaluate_all(&req).await.unwrap();

        assert_eq!(first.evaluations.len(), 1);
        assert_eq!(second.evaluations[0].id, first.evaluations[0].id);
        assert_eq!(h.evaluations.replace_all_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evaluate_all_recomputes_only_stale_flags() {
        let stable = dark_mode_flag();
        let volatile = {
            let variant = Variant::new("v1");
            let variant_id = variant.id;
            Flag::new("experiment", "Experiment")
                .with_variant(variant)
                .with_rule(FlagRule::new(vec![Distribution::new(variant_id, 100)]))
        };
        let stable_id = stable.id;
        let h = harness(vec![stable, volatile]);
        let req = us_request();

        let first = h.service.evaluate_all(&req).await.unwrap();
        let stable_eval_id = first
            .evaluations
            .iter()
            .find(|e| e.flag_id == stable_id)
            .unwrap()
            .id;

        // Only the experiment flag changes.
        h.flags
            .lock()
            .unwrap()
            .iter_mut()
            .find(|f| f.id != stable_id)
            .unwrap()
            .bump_version();

        let second = h.service.evaluate_all(&req).await.unwrap();
        let stable_again = second.evaluations.iter().find(|e| e.flag_id == stable_id).unwrap();
        let volatile_again = second.evaluations.iter().find(|e| e.flag_id != stable_id).unwrap();

        // The untouched flag's evaluation was reused, the mutated one
        // recomputed at its new version.
        assert_eq!(stable_again.id, stable_eval_id);
        assert_eq!(volatile_again.flag_version, 2);
    }

    #[tokio::test]
    async fn test_debug_evaluate_all_traces_every_flag() {
        let h = harness(vec![dark_mode_flag()]);
        let req = us_request().with_debug();

        let resp = h.service.evaluate_all(&req).await.unwrap();
        assert_eq!(resp.user_context, Some(req.user_context.clone()));
        assert!(resp.evaluations.iter().all(|e| e
            .stack_trace
            .as_ref()
            .is_some_and(|s| !s.is_empty())));
        // Nothing persisted.
        assert!(h.evaluations.snapshot().is_empty());
        assert_eq!(h.users.replace_calls.load(Ordering::SeqCst), 0);
    }
}
