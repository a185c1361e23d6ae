use crate::types::tool::ToolCall;

/// Collects streamed tool-call fragments into final `ToolCall` objects.
///
/// Fragments are keyed by the provider's block/choice index because follow-up
/// deltas usually omit the call id. Tolerant: if the argument JSON does not
/// parse, the raw string is kept.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    index: Option<u32>,
    id: String,
    name: String,
    arguments: String,
    complete: Option<serde_json::Value>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn on_started(&mut self, index: u32, id: Option<String>, name: Option<String>) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.index == Some(index)) {
            if let Some(id) = id.filter(|s| !s.is_empty()) {
                slot.id = id;
            }
            if let Some(name) = name.filter(|s| !s.is_empty()) {
                slot.name.push_str(&name);
            }
            return;
        }
        self.slots.push(Slot {
            index: Some(index),
            id: id.unwrap_or_default(),
            name: name.unwrap_or_default(),
            arguments: String::new(),
            complete: None,
        });
    }

    pub fn on_partial(&mut self, index: u32, fragment: &str) {
        if !self.slots.iter().any(|s| s.index == Some(index)) {
            self.on_started(index, None, None);
        }
        if let Some(slot) = self.slots.iter_mut().find(|s| s.index == Some(index)) {
            slot.arguments.push_str(fragment);
        }
    }

    /// Record a call that arrived whole in a single chunk.
    pub fn on_complete(&mut self, id: String, name: String, arguments: serde_json::Value) {
        self.slots.push(Slot {
            index: None,
            id,
            name,
            arguments: String::new(),
            complete: Some(arguments),
        });
    }

    pub fn finalize(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .map(|slot| {
                let arguments = match slot.complete {
                    Some(v) => v,
                    None => parse_arguments(&slot.arguments),
                };
                let id = if slot.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    slot.id
                };
                ToolCall {
                    id,
                    name: slot.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Parse a JSON argument string, keeping the raw text when it is not JSON.
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_join_by_index() {
        let mut asm = ToolCallAssembler::new();
        asm.on_started(0, Some("call_1".into()), Some("get_weather".into()));
        asm.on_partial(0, "{\"city\":");
        asm.on_partial(0, "\"Paris\"}");
        let calls = asm.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments["city"], "Paris");
    }

    #[test]
    fn test_invalid_json_kept_raw() {
        let mut asm = ToolCallAssembler::new();
        asm.on_started(0, Some("c".into()), Some("f".into()));
        asm.on_partial(0, "{not json");
        let calls = asm.finalize();
        assert_eq!(calls[0].arguments, serde_json::json!("{not json"));
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut asm = ToolCallAssembler::new();
        asm.on_complete(String::new(), "lookup".into(), serde_json::json!({"q": 1}));
        let calls = asm.finalize();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments["q"], 1);
    }
}
