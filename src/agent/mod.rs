//! Conversation agent.
//!
//! One turn: snapshot the active settings, capture and trim the home
//! state, render the system prompt, exchange it with the model endpoint,
//! and hand back either the model's reply or a spoken failure. Every
//! failure maps to a fixed user-visible sentence; the diagnostic detail
//! goes to the log, not to the user.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::client::{Completion, CompletionClient, CompletionError};
use crate::config::{RequestConfig, SharedSettings};
use crate::home::{ContextBuilder, PromptBudget};
use crate::prompt::clip_chars;

/// Opaque identifier tying a turn's log lines together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier, for callers without their own scheme.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// The model's reply, exactly as the endpoint returned it.
    Reply { text: String },
    /// The turn could not finish. `message` is what the assistant should
    /// say out loud.
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ConversationOutcome {
    fn failure(kind: FailureKind) -> Self {
        Self::Failure {
            message: kind.user_message().to_string(),
            kind,
        }
    }
}

/// Which stage of the turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The home state could not be read.
    StateUnavailable,
    /// The configured system prompt template did not render.
    TemplateError,
    /// The endpoint answered with something other than a completion.
    ProtocolError,
    /// The endpoint could not be reached, even after a retry.
    AssistantUnavailable,
}

impl FailureKind {
    /// The sentence spoken to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::StateUnavailable => "There was an error communicating with your home.",
            Self::TemplateError => {
                "I had a problem with my system prompt, please check the logs for more information."
            }
            Self::ProtocolError => "There was an error communicating with the API.",
            Self::AssistantUnavailable => {
                "The language model could not be reached, please try again later."
            }
        }
    }
}

/// Drives conversation turns against a completion endpoint.
pub struct ConversationAgent {
    settings: SharedSettings,
    context: ContextBuilder,
    client: Arc<dyn CompletionClient>,
}

impl ConversationAgent {
    pub fn new(
        settings: SharedSettings,
        context: ContextBuilder,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            settings,
            context,
            client,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Process one utterance. The settings are snapshotted once at entry;
    /// a reconfiguration that lands mid-turn affects only later turns.
    pub async fn handle_turn(&self, utterance: &str, turn_id: TurnId) -> ConversationOutcome {
        let settings = self.settings.snapshot();
        let budget = PromptBudget::for_context_size(settings.request.context_size);

        let context = match self.context.build(&budget).await {
            Ok(context) => context,
            Err(err) => {
                error!(turn = %turn_id, %err, "failed to read home state");
                return ConversationOutcome::failure(FailureKind::StateUnavailable);
            }
        };

        let rendered = match settings.template.render(&context) {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(turn = %turn_id, %err, "failed to render system prompt");
                return ConversationOutcome::failure(FailureKind::TemplateError);
            }
        };

        let (system_prompt, clipped) = clip_chars(rendered, budget.window_chars());
        if clipped {
            warn!(
                turn = %turn_id,
                limit = budget.window_chars(),
                "system prompt still over the context window after trimming, clipped"
            );
        }

        debug!(
            turn = %turn_id,
            model = %settings.request.model,
            prompt = %system_prompt,
            "sending prompt"
        );

        let completion = match self
            .complete_with_retry(&system_prompt, utterance, &turn_id, &settings.request)
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                error!(turn = %turn_id, %err, "model exchange failed");
                let kind = if matches!(err, CompletionError::Protocol(_)) {
                    FailureKind::ProtocolError
                } else {
                    FailureKind::AssistantUnavailable
                };
                return ConversationOutcome::failure(kind);
            }
        };

        if let Some(usage) = completion.usage {
            debug!(
                turn = %turn_id,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }
        debug!(turn = %turn_id, response = %completion.text, "assistant response");

        ConversationOutcome::Reply {
            text: completion.text,
        }
    }

    /// One exchange, retried exactly once if the first failure was
    /// retryable.
    async fn complete_with_retry(
        &self,
        system_prompt: &str,
        utterance: &str,
        turn_id: &TurnId,
        config: &RequestConfig,
    ) -> Result<Completion, CompletionError> {
        match self.client.complete(system_prompt, utterance, config).await {
            Ok(completion) => Ok(completion),
            Err(err) if err.is_retryable() => {
                warn!(turn = %turn_id, %err, "model exchange failed, retrying once");
                self.client.complete(system_prompt, utterance, config).await
            }
            Err(err) => Err(err),
        }
    }
}
