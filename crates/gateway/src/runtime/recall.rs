//! Opaque contextual-recall hook.
//!
//! Memory is an external collaborator: the turn runtime asks it for
//! snippets relevant to the user message and prepends whatever comes back
//! as a system message. The default implementation recalls nothing.

#[async_trait::async_trait]
pub trait RecallProvider: Send + Sync {
    /// Snippets relevant to `query` for `user_id`, best-first.
    async fn recall(&self, query: &str, user_id: &str) -> Vec<String>;
}

/// No-op recall used when no memory backend is wired up.
pub struct NoopRecall;

#[async_trait::async_trait]
impl RecallProvider for NoopRecall {
    async fn recall(&self, _query: &str, _user_id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Render recall snippets as the system message the agent sees.
pub fn render_snippets(snippets: &[String]) -> Option<String> {
    if snippets.is_empty() {
        return None;
    }
    let bullets: Vec<String> = snippets.iter().map(|s| format!("- {s}")).collect();
    Some(format!(
        "Relevant information from past interactions:\n{}",
        bullets.join("\n")
    ))
}
