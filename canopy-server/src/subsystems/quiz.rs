//! Quiz subsystem — question generation, answer evaluation, mastery updates
//!
//! Questions are generated per node from its source snippet, with difficulty
//! keyed to the current streak. Answers are judged by the completion backend,
//! which is asked for a small JSON verdict; the verdict parse is deliberately
//! lenient and falls back to "incorrect" rather than erroring, since a broken
//! judgement must not take the quiz down.

use canopy_core::config::MasteryConfig;
use canopy_core::llm::CompletionBackend;
use canopy_core::{mastery, store};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

pub const QUESTION_SYSTEM_PROMPT: &str = "You are an educator generating one focused quiz \
question from a source excerpt. The question must be answerable from the excerpt alone. \
Return only the question text.";

pub const EVALUATION_SYSTEM_PROMPT: &str = "You are a knowledge assessor. Judge whether the \
user's answer to the question is correct, using the source excerpt as ground truth. Respond \
with a JSON object of the form {\"correct\": true/false, \"feedback\": \"...\"} and nothing else.";

/// Question difficulty ladder keyed to the streak of correct answers.
pub fn difficulty_for(consecutive_correct: i32) -> &'static str {
    match consecutive_correct {
        0 => "a basic recall question, answerable in one or two sentences",
        1 => "an applied understanding question grounded in a concrete example",
        2 => "an analytical question comparing the concept with a related one",
        _ => "an advanced question extending the concept to a new scenario",
    }
}

pub fn build_question_prompt(topic: &str, context: &str, consecutive_correct: i32) -> String {
    format!(
        "Write {} testing understanding of \"{}\".\nSource excerpt: {}\nQuestion:",
        difficulty_for(consecutive_correct),
        topic,
        context
    )
}

/// Generate one question. Degrades to a generic fallback when the model is
/// unavailable, mirroring the rest of the quiz flow's fault tolerance.
pub async fn generate_question(
    backend: &dyn CompletionBackend,
    topic: &str,
    context: &str,
    consecutive_correct: i32,
) -> String {
    let user = build_question_prompt(topic, context, consecutive_correct);
    match backend.complete(QUESTION_SYSTEM_PROMPT, &user).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::error!(topic, error = %e, "Question generation failed, using fallback");
            format!("Explain the concept of \"{}\" in your own words.", topic)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub correct: bool,
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    #[serde(default)]
    correct: bool,
    #[serde(default)]
    feedback: Option<String>,
}

/// Parse the model's verdict JSON leniently: fences stripped, object span
/// isolated, defaults on anything missing or unparseable.
pub fn parse_verdict(raw: &str) -> Verdict {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let span = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };
    match serde_json::from_str::<VerdictPayload>(span) {
        Ok(payload) => Verdict {
            correct: payload.correct,
            feedback: payload
                .feedback
                .unwrap_or_else(|| "No feedback provided.".to_string()),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Could not parse verdict, defaulting to incorrect");
            Verdict {
                correct: false,
                feedback: "The evaluation could not be parsed — please try again.".to_string(),
            }
        }
    }
}

pub async fn evaluate_answer(
    backend: &dyn CompletionBackend,
    question: &str,
    answer: &str,
    topic: &str,
    context: &str,
) -> Verdict {
    let user = format!(
        "Topic: {}\nQuestion: {}\nAnswer: {}\nSource excerpt: {}\nJudge the answer.",
        topic, question, answer, context
    );
    match backend.complete(EVALUATION_SYSTEM_PROMPT, &user).await {
        Ok(text) => parse_verdict(&text),
        Err(e) => {
            tracing::error!(topic, error = %e, "Answer evaluation failed");
            Verdict {
                correct: false,
                feedback: format!("Evaluation unavailable: {}", e),
            }
        }
    }
}

/// Start or continue a quiz session for a node and hand back one question.
pub async fn ask(
    pool: &PgPool,
    backend: &dyn CompletionBackend,
    topology_id: Uuid,
    label: &str,
    session_id: Option<Uuid>,
) -> anyhow::Result<serde_json::Value> {
    let node = store::get_node(pool, topology_id, label)
        .await?
        .ok_or_else(|| anyhow::anyhow!("node {:?} not found in topology {}", label, topology_id))?;

    let (session_id, consecutive_correct) = match session_id {
        Some(id) => {
            let session = store::get_quiz_session(pool, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("quiz session {} not found", id))?;
            if session.mastered {
                return Ok(serde_json::json!({
                    "mastered": true,
                    "session_id": session.id,
                    "message": "This knowledge point is already mastered",
                }));
            }
            (session.id, session.consecutive_correct)
        }
        None => {
            let id = store::create_quiz_session(pool, topology_id, label).await?;
            (id, 0)
        }
    };

    let question =
        generate_question(backend, label, &node.content_snippet, consecutive_correct).await;
    let question_id =
        store::insert_question(pool, topology_id, label, session_id, &question).await?;

    Ok(serde_json::json!({
        "question_id": question_id,
        "question": question,
        "node_id": label,
        "session_id": session_id,
    }))
}

/// Judge an answer, update session and node mastery, and generate the next
/// question when the node is not yet mastered.
#[allow(clippy::too_many_arguments)]
pub async fn submit_answer(
    pool: &PgPool,
    backend: &dyn CompletionBackend,
    mastery_config: &MasteryConfig,
    topology_id: Uuid,
    question_id: Uuid,
    session_id: Uuid,
    label: &str,
    answer: &str,
) -> anyhow::Result<serde_json::Value> {
    let question = store::get_question(pool, topology_id, question_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("question {} not found", question_id))?;

    if question.node_label != label || question.session_id != session_id {
        anyhow::bail!("question does not belong to this node and session");
    }

    let node = store::get_node(pool, topology_id, label)
        .await?
        .ok_or_else(|| anyhow::anyhow!("node {:?} not found in topology {}", label, topology_id))?;

    let verdict =
        evaluate_answer(backend, &question.question, answer, label, &node.content_snippet).await;

    store::mark_question_answered(pool, question_id, answer, &verdict.feedback, verdict.correct)
        .await?;

    let mut state = node.mastery();
    mastery::apply_answer(&mut state, verdict.correct, mastery_config);
    store::update_node_mastery(pool, topology_id, label, &state).await?;
    store::update_quiz_session(pool, session_id, state.consecutive_correct, state.mastered).await?;

    let next_question = if state.mastered {
        None
    } else {
        let text =
            generate_question(backend, label, &node.content_snippet, state.consecutive_correct)
                .await;
        let id = store::insert_question(pool, topology_id, label, session_id, &text).await?;
        Some(serde_json::json!({ "id": id, "question": text }))
    };

    Ok(serde_json::json!({
        "correct": verdict.correct,
        "feedback": verdict.feedback,
        "mastered": state.mastered,
        "consecutive_correct": state.consecutive_correct,
        "mastery_score": state.mastery_score,
        "session_id": session_id,
        "next_question": next_question,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
