use codemend_core::pipeline::{AutoApprove, Confirmer};
use dialoguer::Confirm;

/// How a batch of proposals gets approved at the terminal.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TerminalReview {
    Auto(AutoApprove),
    Prompt,
}

impl TerminalReview {
    pub(crate) fn new(auto_approve: bool) -> Self {
        if auto_approve {
            Self::Auto(AutoApprove)
        } else {
            Self::Prompt
        }
    }
}

impl Confirmer for TerminalReview {
    async fn confirm(&self, previews: &[String]) -> anyhow::Result<bool> {
        println!("\nProposed changes:");
        for preview in previews {
            println!("\n{preview}");
        }

        match self {
            Self::Auto(auto) => auto.confirm(previews).await,
            Self::Prompt => {
                let approved = tokio::task::spawn_blocking(|| {
                    Confirm::new()
                        .with_prompt("Apply these changes?")
                        .default(false)
                        .interact()
                })
                .await??;
                Ok(approved)
            }
        }
    }
}
