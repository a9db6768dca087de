//! Core masking engine.

use crate::config::{validate_config, CloakConfig, StoreConfig};
use crate::detect::{self, collect_matches, Detector, PhoneDetector, PhoneRegion, SensitiveMatch};
use crate::errors::{CloakError, CloakResult, StoreError};
use crate::store::{EncryptedStore, EncryptionKey, FileStore, MemoryStore, Store};
use crate::token::{find_tokens, is_valid_type_tag, token_pattern, MaskSession};
use aho_corasick::{AhoCorasick, MatchKind};
use regex::Captures;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the memory store's background cleanup interval.
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Sessions tried before giving up on finding unused tokens.
const MAX_SESSION_ATTEMPTS: usize = 3;

/// A token minted during one masking call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MintedToken {
    pub token: String,
    pub type_tag: String,
    /// Number of places in the text the token was substituted.
    pub occurrences: usize,
}

/// Outcome of a masking call.
#[derive(Debug, Clone, Serialize)]
pub struct Masked {
    /// Text with every detected value replaced by its token.
    pub text: String,
    /// Session identifier shared by all tokens of this call.
    pub session_id: String,
    /// Tokens in order of first appearance.
    pub tokens: Vec<MintedToken>,
}

/// Outcome of an unmasking call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unmasked {
    /// Text with every resolvable token replaced.
    pub text: String,
    /// Number of distinct tokens restored.
    pub restored: usize,
    /// Distinct tokens left in place because the store could not resolve them.
    pub unresolved: Vec<String>,
}

impl Unmasked {
    /// True when no token was left behind.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Core masking engine.
///
/// Holds only configuration: a shared store, the default detector set and an
/// optional store timeout. Each `mask` call creates its own [`MaskSession`],
/// so one engine can serve concurrent calls.
pub struct Cloak {
    store: Arc<dyn Store>,
    detectors: Vec<Arc<dyn Detector>>,
    store_timeout: Option<Duration>,
}

impl Cloak {
    /// Create an engine with every built-in detector.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            detectors: detect::all(),
            store_timeout: None,
        }
    }

    /// Engine backed by an unbounded in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn builder() -> CloakBuilder {
        CloakBuilder::default()
    }

    /// Build the store stack and detector set described by `config`.
    pub fn from_config(config: &CloakConfig) -> CloakResult<Self> {
        validate_config(config).map_err(CloakError::Config)?;

        let mut store: Arc<dyn Store> = match &config.store {
            StoreConfig::Memory {
                ttl_seconds,
                max_entries,
            } => {
                let store = match ttl_seconds {
                    Some(secs) => MemoryStore::with_ttl(Duration::from_secs(*secs)),
                    None => MemoryStore::new(),
                }
                .max_entries(*max_entries);
                if let Some(ttl) = store.ttl() {
                    store.spawn_cleanup_task(ttl.min(MAX_CLEANUP_INTERVAL));
                }
                Arc::new(store)
            }
            StoreConfig::File { path, ttl_seconds } => Arc::new(match ttl_seconds {
                Some(secs) => FileStore::with_ttl(path, Duration::from_secs(*secs)),
                None => FileStore::new(path),
            }),
        };

        // Initialize encryption if a key is configured
        let key = match &config.encryption.key {
            Some(hex) => Some(EncryptionKey::from_hex(hex)?),
            None if std::env::var(&config.encryption.key_env).is_ok() => {
                Some(EncryptionKey::from_env(&config.encryption.key_env)?)
            }
            None => None,
        };
        let encrypted = key.is_some();
        if let Some(key) = key {
            store = Arc::new(EncryptedStore::new(store, key));
        }

        let builtins = &config.detectors.builtins;
        let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();
        if builtins.email {
            detectors.push(Arc::new(detect::email()));
        }
        if builtins.phone {
            let regions = config
                .detectors
                .phone_regions
                .iter()
                .map(|r| r.parse::<PhoneRegion>())
                .collect::<CloakResult<Vec<_>>>()?;
            detectors.push(Arc::new(PhoneDetector::new(regions)));
        }
        if builtins.national_id {
            detectors.push(Arc::new(detect::national_id()));
        }
        if builtins.credit_card {
            detectors.push(Arc::new(detect::credit_card()));
        }
        for pattern in &config.detectors.custom {
            detectors.push(Arc::new(detect::pattern(&pattern.type_tag, &pattern.regex)?));
        }

        tracing::debug!(
            detectors = detectors.len(),
            encrypted = encrypted,
            "Masking engine configured"
        );

        Ok(Self {
            store,
            detectors,
            store_timeout: config.store_timeout_ms.map(Duration::from_millis),
        })
    }

    /// Get reference to the token store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Default detectors used when a call does not supply its own.
    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    /// Mask `text` with the default detectors.
    pub async fn mask(&self, text: &str) -> CloakResult<String> {
        Ok(self.mask_report(text, None).await?.text)
    }

    /// Mask `text` with the given detectors only.
    pub async fn mask_with(
        &self,
        text: &str,
        detectors: &[Arc<dyn Detector>],
    ) -> CloakResult<String> {
        Ok(self.mask_report(text, Some(detectors)).await?.text)
    }

    /// Mask `text` and report the tokens that were minted.
    ///
    /// Fails without output if any mapping cannot be stored. Existing
    /// mappings are never overwritten: if a minted token is already present
    /// in the store the call starts over under a new session.
    pub async fn mask_report(
        &self,
        text: &str,
        detectors: Option<&[Arc<dyn Detector>]>,
    ) -> CloakResult<Masked> {
        self.mask_in_sessions(text, detectors, MaskSession::new).await
    }

    async fn mask_in_sessions(
        &self,
        text: &str,
        detectors: Option<&[Arc<dyn Detector>]>,
        mut new_session: impl FnMut() -> MaskSession,
    ) -> CloakResult<Masked> {
        let detectors = detectors.unwrap_or(self.detectors.as_slice());
        if let Some(bad) = detectors.iter().find(|d| !is_valid_type_tag(d.type_tag())) {
            return Err(CloakError::InvalidTypeTag(bad.type_tag().to_string()));
        }

        let matches = collect_matches(text, detectors);
        if matches.is_empty() {
            return Ok(Masked {
                text: text.to_string(),
                session_id: new_session().session_id().to_string(),
                tokens: Vec::new(),
            });
        }

        let values: Vec<&str> = matches.iter().map(|m| m.value.as_str()).collect();
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&values)
            .map_err(|e| CloakError::Internal(e.to_string()))?;

        for attempt in 1..=MAX_SESSION_ATTEMPTS {
            let substitution = substitute(&automaton, &matches, text, new_session());

            if let Some(taken) = self.first_stored(&substitution.pending).await? {
                tracing::warn!(
                    token = %taken,
                    attempt = attempt,
                    "Token already in store, retrying with a new session"
                );
                continue;
            }

            for (token, value) in &substitution.pending {
                self.call_store(self.store.put(token, value))
                    .await
                    .map_err(|source| CloakError::StorageWrite {
                        token: token.clone(),
                        source,
                    })?;
                tracing::trace!(token = %token, "Stored token");
            }

            tracing::debug!(
                session_id = %substitution.masked.session_id,
                tokens = substitution.masked.tokens.len(),
                "Masked text"
            );
            return Ok(substitution.masked);
        }

        Err(CloakError::SessionCollision {
            attempts: MAX_SESSION_ATTEMPTS,
        })
    }

    /// First of `pending` that the store already holds.
    async fn first_stored(&self, pending: &[(String, String)]) -> CloakResult<Option<String>> {
        for (token, _) in pending {
            let taken = self
                .call_store(self.store.has(token))
                .await
                .map_err(|source| CloakError::StorageWrite {
                    token: token.clone(),
                    source,
                })?;
            if taken {
                return Ok(Some(token.clone()));
            }
        }
        Ok(None)
    }

    /// Replace every token in `text` the store can resolve.
    ///
    /// Unknown or expired tokens stay verbatim and are listed in
    /// [`Unmasked::unresolved`]. Fails only when every lookup errored.
    pub async fn unmask(&self, text: &str) -> CloakResult<Unmasked> {
        let found = find_tokens(text);
        if found.is_empty() {
            return Ok(Unmasked {
                text: text.to_string(),
                restored: 0,
                unresolved: Vec::new(),
            });
        }

        let mut resolved: HashMap<&str, String> = HashMap::new();
        let mut unresolved = Vec::new();
        let mut last_error = None;
        let mut failures = 0usize;

        for token in found.iter().copied() {
            match self.call_store(self.store.get(token)).await {
                Ok(Some(value)) => {
                    resolved.insert(token, value);
                }
                Ok(None) => {
                    tracing::trace!(token = %token, "Token not found in store");
                    unresolved.push(token.to_string());
                }
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "Token lookup failed");
                    failures += 1;
                    last_error = Some(e);
                    unresolved.push(token.to_string());
                }
            }
        }

        if failures == found.len() {
            if let Some(e) = last_error {
                return Err(CloakError::StorageUnavailable(e));
            }
        }

        let restored_text = token_pattern()
            .replace_all(text, |caps: &Captures| {
                resolved
                    .get(&caps[0])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();

        tracing::debug!(
            restored = resolved.len(),
            unresolved = unresolved.len(),
            "Unmasked text"
        );

        Ok(Unmasked {
            text: restored_text,
            restored: resolved.len(),
            unresolved,
        })
    }

    /// Run a store call, bounded by the configured timeout.
    async fn call_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => call.await,
        }
    }
}

/// Masked text plus the mappings it still needs stored.
struct Substitution {
    masked: Masked,
    pending: Vec<(String, String)>,
}

/// Single pass over the original text. Tokens are minted in order of first
/// appearance and substituted text is never rescanned.
fn substitute(
    automaton: &AhoCorasick,
    matches: &[SensitiveMatch],
    text: &str,
    mut session: MaskSession,
) -> Substitution {
    let mut tokens: Vec<MintedToken> = Vec::new();
    let mut pending: Vec<(String, String)> = Vec::new();
    let mut masked = String::with_capacity(text.len());

    automaton.replace_all_with(text, &mut masked, |mat, value, dst| {
        let type_tag = &matches[mat.pattern().as_usize()].type_tag;
        let (token, fresh) = session.token_for(type_tag, value);
        if fresh {
            tokens.push(MintedToken {
                token: token.clone(),
                type_tag: type_tag.clone(),
                occurrences: 0,
            });
            pending.push((token.clone(), value.to_string()));
        }
        if let Some(minted) = tokens.iter_mut().find(|t| t.token == token) {
            minted.occurrences += 1;
        }
        dst.push_str(&token);
        true
    });

    Substitution {
        masked: Masked {
            text: masked,
            session_id: session.session_id().to_string(),
            tokens,
        },
        pending,
    }
}

/// Builder for [`Cloak`].
#[derive(Default)]
pub struct CloakBuilder {
    store: Option<Arc<dyn Store>>,
    detectors: Option<Vec<Arc<dyn Detector>>>,
    store_timeout: Option<Duration>,
}

impl CloakBuilder {
    /// Use `store`, taking ownership.
    pub fn store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Use a store shared with other engines.
    pub fn shared_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default detector set.
    pub fn detectors(mut self, detectors: Vec<Arc<dyn Detector>>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    /// Add one detector to the default set.
    pub fn detector(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors
            .get_or_insert_with(Vec::new)
            .push(Arc::new(detector));
        self
    }

    /// Bound every store call by `timeout`.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Cloak {
        Cloak {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            detectors: self.detectors.unwrap_or_else(detect::all),
            store_timeout: self.store_timeout,
        }
    }
}
