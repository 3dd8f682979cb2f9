//! Fetch orchestrator — drives rounds of resolve-and-download across the
//! candidate id set.
//!
//! Each round: recompute the unresolved set (candidates minus cached,
//! skipped, and permanently-failed ids), pair every id with a credential
//! from the pool, dispatch resolution through a bounded worker pool whose
//! resolved URLs feed a single download-consumer task, block until the whole
//! round completes, then partition the results. Transient failures stay
//! eligible for the next round; after the round budget is spent, the
//! remaining ids are reported once as a non-fatal aggregate and the caller's
//! output simply omits those images.

mod shared;

use crate::cache::AvatarCache;
use crate::config::Config;
use crate::credentials::CredentialPool;
use crate::download::DownloadWorker;
use crate::effects::Effect;
use crate::error::{Error, IsTransient, Result};
use crate::resolver::{HttpResolver, IdentityProvider, Resolved};
use crate::types::{FetchReport, TaskOutcome, UserId};
use shared::{DOWNLOAD_CHANNEL_BUFFER, DownloadRequest, SharedState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;

/// Drives the avatar fetch pipeline: scanning, dispatch, collection, and
/// evaluation, round by round, until every candidate is resolved or the
/// round budget is spent.
pub struct FetchOrchestrator {
    config: Config,
    credentials: CredentialPool,
    provider: Arc<dyn IdentityProvider>,
    worker: Arc<DownloadWorker>,
    cache: AvatarCache,
}

impl FetchOrchestrator {
    /// Create an orchestrator backed by the HTTP identity API.
    pub fn new(config: Config, credentials: CredentialPool) -> Result<Self> {
        let provider = Arc::new(HttpResolver::new(&config)?);
        Self::with_provider(config, credentials, provider)
    }

    /// Create an orchestrator with a custom identity provider.
    ///
    /// This is the seam tests use to drive the round machinery with scripted
    /// resolution outcomes.
    pub fn with_provider(
        config: Config,
        credentials: CredentialPool,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let worker = Arc::new(DownloadWorker::new(&config)?);
        let cache = AvatarCache::new(
            config.cache.cache_dir.clone(),
            Duration::from_secs(config.cache.clear_interval_secs),
        )?;

        Ok(Self {
            config,
            credentials,
            provider,
            worker,
            cache,
        })
    }

    /// The cache this orchestrator writes into. Collaborators read avatar
    /// paths from here via [`AvatarCache::path_for`].
    pub fn cache(&self) -> &AvatarCache {
        &self.cache
    }

    /// Resolve the probe user once per credential so a dead token surfaces
    /// before any rounds are spent.
    ///
    /// A rejected credential is returned as an error immediately; transient
    /// failures only produce a warning, since the run itself may still
    /// succeed.
    pub async fn verify_credentials(&self) -> Result<()> {
        let probe = UserId::new(&self.config.api.probe_user_id);
        for token in self.credentials.tokens() {
            match self.provider.resolve(&probe, token).await {
                Ok(_) => {}
                Err(e @ Error::InvalidToken { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Credential check could not complete");
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline over `candidates` and report the outcome.
    ///
    /// Never fails because of unresolved avatars — those are aggregated in
    /// the report. Errors are reserved for configuration problems and for
    /// the case where every credential has been rejected.
    pub async fn run(&self, candidates: &[UserId]) -> Result<FetchReport> {
        if !self.config.fetch.avatar_mode {
            return Ok(FetchReport::default());
        }

        self.cache.maintain()?;

        let effect = self.config.fetch.effect;
        let state = SharedState::new(self.config.fetch.max_concurrent_resolves);
        let mut credentials = self.credentials.clone();

        let mut downloaded: Vec<UserId> = Vec::new();
        let mut skipped: Vec<UserId> = Vec::new();
        let mut skipped_set: HashSet<UserId> = HashSet::new();
        let mut permanent: Vec<UserId> = Vec::new();
        let mut permanent_set: HashSet<UserId> = HashSet::new();
        let mut invalid_tokens: Vec<String> = Vec::new();
        let mut rounds = 0u32;

        for round in 1..=self.config.fetch.max_rounds {
            let pending = self.scan(candidates, effect, &skipped_set, &permanent_set);
            if pending.is_empty() {
                break;
            }
            rounds = round;

            if round > 1 {
                tracing::info!(
                    round,
                    max_rounds = self.config.fetch.max_rounds,
                    pending = pending.len(),
                    "Retrying unresolved avatars"
                );
            }

            // Pair each pending id with a credential for this round. The
            // pairing is also what lets EVALUATE retire the exact token an
            // InvalidToken failure came from.
            let assignments: HashMap<UserId, String> = pending
                .iter()
                .cloned()
                .zip(credentials.assign(pending.len()).map(str::to_string))
                .collect();

            let results = self.run_round(&pending, &assignments, effect, &state).await;

            // EVALUATE — strictly serialized with dispatch and collection,
            // so the accumulators below need no locking.
            for (user_id, outcome) in results {
                match outcome {
                    TaskOutcome::Success(path) => {
                        tracing::debug!(user_id = %user_id, path = %path.display(), "Avatar cached");
                        downloaded.push(user_id);
                    }
                    TaskOutcome::Skip => {
                        if skipped_set.insert(user_id.clone()) {
                            skipped.push(user_id);
                        }
                    }
                    TaskOutcome::Failed(Error::InvalidToken { token_hint }) => {
                        // Fatal for the credential, not for the id: the id
                        // stays pending and is paired with a different token
                        // next round.
                        if let Some(token) = assignments.get(&user_id) {
                            credentials.retire(token);
                        }
                        tracing::error!(
                            user_id = %user_id,
                            token = %token_hint,
                            "API rejected a credential"
                        );
                        if !invalid_tokens.contains(&token_hint) {
                            invalid_tokens.push(token_hint);
                        }
                        if credentials.is_empty() {
                            return Err(Error::Config {
                                message: "every API token was rejected by the identity service"
                                    .to_string(),
                                key: Some("tokens".to_string()),
                            });
                        }
                    }
                    TaskOutcome::Failed(e) if e.is_transient() => {
                        state.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(user_id = %user_id, error = %e, "Avatar fetch failed, will retry");
                    }
                    TaskOutcome::Failed(e) => {
                        state.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(user_id = %user_id, error = %e, "Avatar fetch failed permanently");
                        if permanent_set.insert(user_id.clone()) {
                            permanent.push(user_id);
                        }
                    }
                }
            }
        }

        // Whatever is still pending after the round budget joins the ids
        // that failed permanently along the way.
        let mut unresolved = permanent;
        unresolved.extend(self.scan(candidates, effect, &skipped_set, &permanent_set));

        if !unresolved.is_empty() {
            tracing::warn!(
                count = unresolved.len(),
                ids = ?unresolved.iter().map(UserId::as_str).collect::<Vec<_>>(),
                "Unable to download some avatars; their output will use an empty placeholder"
            );
        }

        tracing::info!(
            resolved = state.resolved.load(Ordering::Relaxed),
            downloaded = state.downloaded.load(Ordering::Relaxed),
            failed = state.failed.load(Ordering::Relaxed),
            rounds,
            "Avatar fetch finished"
        );

        Ok(FetchReport {
            downloaded,
            skipped,
            unresolved,
            invalid_tokens,
            rounds,
        })
    }

    /// SCANNING — recompute the unresolved id set: candidates minus anything
    /// cached, already skipped, or already failed permanently. Duplicates in
    /// the candidate list collapse so an id is in flight at most once per
    /// round.
    fn scan(
        &self,
        candidates: &[UserId],
        effect: Effect,
        skipped: &HashSet<UserId>,
        permanent: &HashSet<UserId>,
    ) -> Vec<UserId> {
        let mut seen = HashSet::new();
        candidates
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .filter(|id| !skipped.contains(id) && !permanent.contains(id))
            .filter(|id| !self.cache.contains(id, effect))
            .cloned()
            .collect()
    }

    /// DISPATCH and COLLECT for one round.
    ///
    /// Spawns one resolver task per pending id, bounded by the run's
    /// semaphore; resolved URLs flow through a bounded queue into a single
    /// download-consumer task, decoupling rate-limited resolution from the
    /// faster bulk downloads. Returns only after every task of the round has
    /// produced exactly one outcome — a panicked worker is folded into a
    /// classified failure so the barrier count always adds up.
    async fn run_round(
        &self,
        pending: &[UserId],
        assignments: &HashMap<UserId, String>,
        effect: Effect,
        state: &Arc<SharedState>,
    ) -> Vec<(UserId, TaskOutcome)> {
        let (dl_tx, dl_rx) = mpsc::channel::<DownloadRequest>(DOWNLOAD_CHANNEL_BUFFER);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(UserId, TaskOutcome)>();

        let consumer = tokio::spawn(download_consumer(
            dl_rx,
            out_tx.clone(),
            Arc::clone(&self.worker),
            self.cache.clone(),
            effect,
            Arc::clone(state),
        ));

        let mut handles = Vec::with_capacity(pending.len());
        for user_id in pending {
            let Some(token) = assignments.get(user_id).cloned() else {
                continue;
            };
            let Ok(permit) = state.resolve_limit.clone().acquire_owned().await else {
                break;
            };

            let provider = Arc::clone(&self.provider);
            let state = Arc::clone(state);
            let dl_tx = dl_tx.clone();
            let out_tx = out_tx.clone();
            let task_id = user_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                match provider.resolve(&task_id, &token).await {
                    Ok(Resolved::Avatar(url)) => {
                        state.resolved.fetch_add(1, Ordering::Relaxed);
                        let request = DownloadRequest {
                            user_id: task_id.clone(),
                            url,
                        };
                        if dl_tx.send(request).await.is_err() {
                            let _ = out_tx.send((
                                task_id,
                                TaskOutcome::Failed(Error::Other(
                                    "download queue closed before hand-off".to_string(),
                                )),
                            ));
                        }
                    }
                    Ok(Resolved::NoAvatar) => {
                        let _ = out_tx.send((task_id, TaskOutcome::Skip));
                    }
                    Err(e) => {
                        let _ = out_tx.send((task_id, TaskOutcome::Failed(e)));
                    }
                }
            });
            handles.push((user_id.clone(), handle));
        }

        // The orchestrator's own senders must go before the barrier, or the
        // consumer and collector would wait forever.
        drop(dl_tx);
        drop(out_tx);

        let mut results: Vec<(UserId, TaskOutcome)> = Vec::with_capacity(pending.len());

        let (task_ids, joins): (Vec<UserId>, Vec<_>) = handles.into_iter().unzip();
        for (user_id, join_result) in task_ids
            .into_iter()
            .zip(futures::future::join_all(joins).await)
        {
            if let Err(join_err) = join_result {
                results.push((
                    user_id,
                    TaskOutcome::Failed(Error::Other(format!(
                        "resolver worker died: {join_err}"
                    ))),
                ));
            }
        }

        if let Err(join_err) = consumer.await {
            tracing::error!(error = %join_err, "Download consumer died");
        }

        while let Some(result) = out_rx.recv().await {
            results.push(result);
        }

        // Any id that slipped through both channels (e.g. the consumer died
        // holding its request) still gets a classified outcome.
        let accounted: HashSet<UserId> = results.iter().map(|(id, _)| id.clone()).collect();
        for user_id in pending.iter().filter(|id| !accounted.contains(id)) {
            results.push((
                user_id.clone(),
                TaskOutcome::Failed(Error::Other("no outcome recorded for task".to_string())),
            ));
        }

        results
    }
}

/// Drains the resolve-to-download queue, writing one cache file per request.
///
/// A single consumer absorbs the asymmetry between externally rate-limited
/// resolution calls and the faster image downloads.
async fn download_consumer(
    mut rx: mpsc::Receiver<DownloadRequest>,
    out_tx: mpsc::UnboundedSender<(UserId, TaskOutcome)>,
    worker: Arc<DownloadWorker>,
    cache: AvatarCache,
    effect: Effect,
    state: Arc<SharedState>,
) {
    while let Some(request) = rx.recv().await {
        let dest = cache.path_for(&request.user_id, effect);
        let outcome = match worker.fetch(&request.url, effect, &dest).await {
            Ok(()) => {
                state.downloaded.fetch_add(1, Ordering::Relaxed);
                TaskOutcome::Success(dest)
            }
            Err(e) => TaskOutcome::Failed(e),
        };
        let _ = out_tx.send((request.user_id, outcome));
    }
}
