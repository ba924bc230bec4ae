//! Password candidate ordering and the retry loop over them.

use std::future::Future;
use std::path::Path;

use crate::config::ExtractConfig;
use crate::error::PipelineError;

/// Builds the ordered, de-duplicated password list for one archive.
pub struct PasswordCandidates;

impl PasswordCandidates {
    /// Order: no password, the common list, the archive's file name and stem,
    /// then the operator's password. Empty strings count as "no password".
    pub fn build(config: &ExtractConfig, archive: &Path) -> Vec<Option<String>> {
        let mut raw: Vec<Option<String>> = vec![None];
        raw.extend(config.passwords.iter().cloned().map(Some));

        if config.try_archive_name {
            if let Some(name) = archive.file_name() {
                raw.push(Some(name.to_string_lossy().into_owned()));
            }
            raw.push(Some(super::archive_stem(archive)));
        }

        if let Some(user) = &config.user_password {
            raw.push(Some(user.clone()));
        }

        let mut candidates: Vec<Option<String>> = Vec::with_capacity(raw.len());
        for candidate in raw {
            let candidate = candidate.filter(|p| !p.is_empty());
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }
}

/// Why one attempt did not succeed.
#[derive(Debug)]
pub enum AttemptError {
    /// Wrong password or nothing extracted; try the next candidate
    Rejected(String),
    /// Stop the loop and surface this error
    Fatal(PipelineError),
}

/// Result of running the candidate loop.
#[derive(Debug)]
pub enum TryOutcome<T> {
    Success {
        value: T,
        password: Option<String>,
        attempts: usize,
    },
    /// Every candidate was rejected (or there were none)
    Exhausted { attempts: usize },
    Fatal(PipelineError),
}

/// Try `attempt` with each candidate in order and return the first success.
///
/// The loop itself has no side effects; all IO happens inside `attempt`.
pub async fn try_candidates<T, F, Fut>(candidates: &[Option<String>], mut attempt: F) -> TryOutcome<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempts = 0;
    for candidate in candidates {
        attempts += 1;
        match attempt(candidate.clone()).await {
            Ok(value) => {
                return TryOutcome::Success {
                    value,
                    password: candidate.clone(),
                    attempts,
                };
            }
            Err(AttemptError::Rejected(reason)) => {
                tracing::debug!(
                    "Password {} rejected: {reason}",
                    candidate.as_deref().map(mask_password).unwrap_or_else(|| "<none>".into())
                );
            }
            Err(AttemptError::Fatal(e)) => return TryOutcome::Fatal(e),
        }
    }
    TryOutcome::Exhausted { attempts }
}

/// Mask a password for logs: the first three characters, then `***`.
pub fn mask_password(password: &str) -> String {
    let prefix: String = password.chars().take(3).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_candidate_order_and_dedup() {
        let config = ExtractConfig {
            passwords: vec!["123".into(), "album".into(), "123".into(), String::new()],
            user_password: Some("secret".into()),
            try_archive_name: true,
        };
        let candidates = PasswordCandidates::build(&config, Path::new("/in/album.7z"));

        assert_eq!(
            candidates,
            vec![
                None,
                Some("123".to_string()),
                Some("album".to_string()),
                Some("album.7z".to_string()),
                Some("secret".to_string()),
            ]
        );
    }

    #[test]
    fn test_archive_name_can_be_disabled() {
        let config = ExtractConfig {
            passwords: vec![],
            user_password: None,
            try_archive_name: false,
        };
        let candidates = PasswordCandidates::build(&config, Path::new("/in/album.7z"));
        assert_eq!(candidates, vec![None]);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let tried = RefCell::new(Vec::new());
        let candidates = vec![None, Some("a".to_string()), Some("b".to_string()), Some("c".to_string())];

        let outcome = try_candidates(&candidates, |pw| {
            tried.borrow_mut().push(pw.clone());
            async move {
                match pw.as_deref() {
                    Some("b") => Ok(42),
                    _ => Err(AttemptError::Rejected("wrong password".into())),
                }
            }
        })
        .await;

        match outcome {
            TryOutcome::Success {
                value,
                password,
                attempts,
            } => {
                assert_eq!(value, 42);
                assert_eq!(password.as_deref(), Some("b"));
                assert_eq!(attempts, 3);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(tried.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_candidates_exhaust_immediately() {
        let outcome: TryOutcome<()> = try_candidates(&[], |_| async {
            Err(AttemptError::Rejected("unreachable".into()))
        })
        .await;
        assert!(matches!(outcome, TryOutcome::Exhausted { attempts: 0 }));
    }

    #[tokio::test]
    async fn test_fatal_stops_loop() {
        let calls = RefCell::new(0);
        let candidates = vec![None, Some("a".to_string())];

        let outcome: TryOutcome<()> = try_candidates(&candidates, |_| {
            *calls.borrow_mut() += 1;
            async {
                Err(AttemptError::Fatal(PipelineError::UnsupportedFormat {
                    path: "x.bin".into(),
                    format: "unknown".into(),
                }))
            }
        })
        .await;

        assert!(matches!(
            outcome,
            TryOutcome::Fatal(PipelineError::UnsupportedFormat { .. })
        ));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_mask_password() {
        assert_eq!(mask_password("hunter2"), "hun***");
        assert_eq!(mask_password("ab"), "ab***");
        assert_eq!(mask_password("密码很长"), "密码很***");
    }
}
