//! Post-commit side effects.
//!
//! Once a primary transition is persisted, its follow-up actions (refund,
//! escrow funding, audit, notification) run here, each behind its own error
//! boundary. A failing effect is logged and reported; it never unwinds the
//! committed transition.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tracing::{debug, error};

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectOutcome {
    pub name: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub outcomes: Vec<EffectOutcome>,
}

impl EffectReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EffectOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn succeeded(&self, name: &str) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.name == name && o.error.is_none())
    }
}

pub struct PostCommitEffects<'a> {
    subject: String,
    effects: Vec<(&'static str, BoxFuture<'a, AppResult<()>>)>,
}

impl<'a> PostCommitEffects<'a> {
    /// `subject` names the committed resource in log lines, e.g. `booking:123`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            effects: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, name: &'static str, effect: F)
    where
        F: Future<Output = AppResult<()>> + Send + 'a,
    {
        self.effects.push((name, effect.boxed()));
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub async fn run(self) -> EffectReport {
        let subject = self.subject;
        let (names, futures): (Vec<_>, Vec<_>) = self.effects.into_iter().unzip();
        let results = join_all(futures).await;

        let outcomes = names
            .into_iter()
            .zip(results)
            .map(|(name, result)| match result {
                Ok(()) => {
                    debug!(subject = %subject, effect = name, "post-commit effect applied");
                    EffectOutcome { name, error: None }
                }
                Err(e) => {
                    error!(
                        subject = %subject,
                        effect = name,
                        error = %e.internal_message(),
                        "post-commit effect failed; manual follow-up required"
                    );
                    EffectOutcome {
                        name,
                        error: Some(e.internal_message()),
                    }
                }
            })
            .collect();

        EffectReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn failing_effect_does_not_stop_the_others() {
        let mut effects = PostCommitEffects::new("booking:1");
        effects.push("refund", async { Err(AppError::internal("provider down")) });
        effects.push("audit", async { Ok(()) });
        effects.push("notify", async { Ok(()) });

        let report = effects.run().await;
        assert!(!report.all_succeeded());
        assert!(report.succeeded("audit"));
        assert!(report.succeeded("notify"));
        let failed: Vec<_> = report.failed().map(|o| o.name).collect();
        assert_eq!(failed, vec!["refund"]);
    }

    #[tokio::test]
    async fn empty_runner_reports_success() {
        let report = PostCommitEffects::new("booking:2").run().await;
        assert!(report.all_succeeded());
    }
}
