/// A predefined question offered before the first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptShortcut {
    pub title: String,
    pub subtitle: String,
}

impl PromptShortcut {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }

    /// Text submitted as the user message.
    pub fn composed_text(&self) -> String {
        format!("{}: {}", self.title, self.subtitle)
    }
}

pub fn default_shortcuts() -> Vec<PromptShortcut> {
    vec![
        PromptShortcut::new(
            "Xác suất cơ bản",
            "Giải thích công thức xác suất cơ bản và cách áp dụng vào bài toán thực tế?",
        ),
        PromptShortcut::new(
            "Phân phối xác suất",
            "Phân phối chuẩn là gì và các ứng dụng của nó trong thống kê?",
        ),
        PromptShortcut::new(
            "Biến ngẫu nhiên",
            "Sự khác biệt giữa biến ngẫu nhiên rời rạc và liên tục là gì?",
        ),
        PromptShortcut::new(
            "Định lý giới hạn trung tâm",
            "Giải thích ý nghĩa và áp dụng của định lý giới hạn trung tâm?",
        ),
    ]
}
