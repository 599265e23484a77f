/// Pricing for an OpenAI chat model.
#[derive(Clone, Debug)]
pub struct OpenAiModelInfo {
    pub name: &'static str,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl OpenAiModelInfo {
    pub fn calculate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let input = prompt_tokens as f64 / 1_000_000.0 * self.input_cost_per_mtok;
        let output = completion_tokens as f64 / 1_000_000.0 * self.output_cost_per_mtok;
        input + output
    }
}

pub static GPT_4O_MINI: OpenAiModelInfo = OpenAiModelInfo {
    name: "gpt-4o-mini",
    input_cost_per_mtok: 0.15,
    output_cost_per_mtok: 0.60,
};

pub static GPT_4O: OpenAiModelInfo = OpenAiModelInfo {
    name: "gpt-4o",
    input_cost_per_mtok: 2.50,
    output_cost_per_mtok: 10.0,
};

pub static GPT_4: OpenAiModelInfo = OpenAiModelInfo {
    name: "gpt-4",
    input_cost_per_mtok: 30.0,
    output_cost_per_mtok: 60.0,
};

pub static GPT_35_TURBO: OpenAiModelInfo = OpenAiModelInfo {
    name: "gpt-3.5-turbo",
    input_cost_per_mtok: 1.50,
    output_cost_per_mtok: 2.00,
};

static ALL_MODELS: &[&OpenAiModelInfo] = &[&GPT_4O_MINI, &GPT_4O, &GPT_4, &GPT_35_TURBO];

/// Exact match, else the longest known name that prefixes `name`
/// (so dated snapshots like `gpt-4o-2024-08-06` price as `gpt-4o`).
pub fn find_model(name: &str) -> Option<&'static OpenAiModelInfo> {
    if let Some(m) = ALL_MODELS.iter().find(|m| m.name == name) {
        return Some(*m);
    }
    ALL_MODELS
        .iter()
        .filter(|m| name.starts_with(m.name))
        .max_by_key(|m| m.name.len())
        .copied()
}

/// Rate applied to models missing from the table. The most expensive entry,
/// so unknown models are never under-reported.
pub fn fallback_rates() -> &'static OpenAiModelInfo {
    &GPT_4
}

/// Estimated USD cost of one request.
///
/// Responses not produced by a real model cost exactly zero.
pub fn estimate_cost(
    provider: &str,
    model: Option<&str>,
    prompt_tokens: u32,
    completion_tokens: u32,
    real_ai: bool,
) -> f64 {
    if !real_ai {
        return 0.0;
    }
    let info = match (provider, model) {
        ("openai", Some(m)) => find_model(m).unwrap_or_else(fallback_rates),
        _ => fallback_rates(),
    };
    info.calculate_cost(prompt_tokens, completion_tokens)
}
