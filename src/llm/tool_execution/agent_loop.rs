use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AssistantTurn, collect_turn};
use crate::llm::client_core::OpenAIClient;
use crate::llm::error::LlmError;
use crate::llm::events::StreamEvent;
use crate::llm::history::sanitize_history;
use crate::llm::types::ChatMessage;
use crate::tools::{MutationSink, ToolRegistry};

/// Sends `messages` and runs tools until the model answers without calling
/// any, or `llm_cfg.max_rounds` turns have passed. Every turn and tool
/// result is appended to `messages`.
#[allow(clippy::too_many_arguments)]
pub async fn run_conversation<C: ?Sized + Sync>(
    client: &OpenAIClient,
    model: &str,
    messages: &mut Vec<ChatMessage>,
    registry: &ToolRegistry<C>,
    ctx: &C,
    sink: &MutationSink,
    events: Option<&UnboundedSender<StreamEvent>>,
    cancel: Option<CancellationToken>,
) -> Result<AssistantTurn, LlmError> {
    let cancel = cancel.unwrap_or_default();
    let max_rounds = client.llm_cfg.max_rounds;
    let tools = registry.tool_defs();

    for round in 1..=max_rounds {
        if cancel.is_cancelled() {
            info!(round, "conversation cancelled");
            return Err(LlmError::Cancelled);
        }
        sanitize_history(messages);
        debug!(round, messages = messages.len(), "conversation round");

        let stream = client.chat_events(model, messages.clone(), tools.clone(), Some(cancel.clone()));
        let turn = match collect_turn(stream, events).await {
            Ok(turn) => turn,
            Err(_) if cancel.is_cancelled() => return Err(LlmError::Cancelled),
            Err(e) => return Err(e),
        };
        messages.push(turn.to_message());

        if turn.tool_calls.is_empty() {
            debug!(round, "conversation converged");
            return Ok(turn);
        }
        for call in &turn.tool_calls {
            let result = registry
                .dispatch(call.name(), call.arguments(), &call.id, ctx, sink)
                .await;
            debug!(tool = call.name(), is_error = result.is_error, "tool result appended");
            messages.push(result.to_message());
        }
    }

    warn!(rounds = max_rounds, "conversation did not converge");
    Err(LlmError::Convergence { rounds: max_rounds })
}
