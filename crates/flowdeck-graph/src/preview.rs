use serde_json::Value;

/// Strings longer than this made only of base64 characters are shown as images.
const RAW_BASE64_MIN_LEN: usize = 500;
/// Structured outputs are cut to this many characters.
const JSON_PREVIEW_CHARS: usize = 50;

/// Display summary of a node's reported output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPreview {
    Image { src: String },
    Text(String),
}

impl OutputPreview {
    /// Summarize an output value. `null` has no preview.
    pub fn of(output: &Value) -> Option<Self> {
        match output {
            Value::Null => None,
            Value::String(s) if s.starts_with("data:image") => {
                Some(Self::Image { src: s.clone() })
            }
            Value::String(s) if s.len() > RAW_BASE64_MIN_LEN && is_base64(s) => Some(Self::Image {
                src: format!("data:image/png;base64,{}", s),
            }),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Object(_) | Value::Array(_) => {
                let json = output.to_string();
                if json.chars().count() > JSON_PREVIEW_CHARS {
                    let cut: String = json.chars().take(JSON_PREVIEW_CHARS).collect();
                    Some(Self::Text(format!("{}...", cut)))
                } else {
                    Some(Self::Text(json))
                }
            }
            other => Some(Self::Text(other.to_string())),
        }
    }

    /// One-line label for text-only surfaces.
    pub fn label(&self) -> &str {
        match self {
            Self::Image { .. } => "[Image Data]",
            Self::Text(s) => s,
        }
    }
}

fn is_base64(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}
