use super::{Config, Secret};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("CODEMEND_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODEMEND_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODEMEND_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODEMEND_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CODEMEND_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("CODEMEND_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.max_tokens = n;
        }
        if let Ok(v) = std::env::var("CODEMEND_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.llm.temperature = t;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("CODEMEND_INDEX_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.index.backend = backend;
            } else {
                tracing::warn!("ignoring invalid CODEMEND_INDEX_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODEMEND_INDEX_EMBEDDING_DIMENSION")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.embedding_dimension = n;
        }
        if let Ok(v) = std::env::var("CODEMEND_INDEX_TOP_K")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.top_k = n;
        }
        if let Ok(v) = std::env::var("CODEMEND_INDEX_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.concurrency = n;
        }
        if let Ok(v) = std::env::var("CODEMEND_INDEX_EXTENSIONS") {
            self.index.extensions = v
                .split(',')
                .map(|e| e.trim().trim_start_matches('.'))
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("CODEMEND_PATCH_AUTO_APPROVE")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.patch.auto_approve = enabled;
        }
    }

    fn apply_env_secrets(&mut self) {
        let key = std::env::var("CODEMEND_CLAUDE_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = key {
            self.secrets.claude_api_key = Some(Secret::new(key));
        }
    }
}
