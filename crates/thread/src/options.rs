use sigma_llm::DEFAULT_OPENAI_MODEL;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "Bạn là một trợ lý giáo dục chuyên về toán và xác suất. \
Khi đưa ra các công thức, hãy định dạng chúng bằng LaTeX với cú pháp Markdown. \
Sử dụng $...$ cho công thức inline và $$...$$ cho công thức block. \
Đảm bảo rằng các công thức toán học được viết chính xác.";

pub const DEFAULT_FAILURE_MESSAGE: &str = "Xin lỗi, đã có lỗi xảy ra. Vui lòng thử lại sau.";

/// Per-controller request settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model_id: String,
    /// Sent first in every prompt context.
    pub system_instruction: String,
    /// Replaces the assistant reply whenever a cycle fails.
    pub failure_message: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_OPENAI_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ChatOptions {
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
