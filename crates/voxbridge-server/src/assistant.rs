//! The default assistant persona: a medication reminder.

use serde_json::{json, Value};
use voxbridge_types::EngineContext;

pub const SYSTEM_PROMPT: &str = "You are a friendly, concise medication reminder assistant. \
Use the provided 'medicine' JSON to answer patient questions. Always prioritize safety: do not \
provide medical advice beyond the medication label. If asked about dose or timing, repeat the \
provided official values. If the user expresses severe symptoms, instruct them to seek urgent care.";

/// The medication the assistant reminds the caller about.
pub fn medicine_context() -> Value {
    json!({
        "medicine": {
            "name": "paracetamol",
            "form": "tablet",
            "route": "oral",
            "meal_configuration": "after meal",
            "time": "08:00",
            "dosage_value": 500,
            "dosage_unit": "mg"
        }
    })
}

/// Fills blank instructions and a missing context with the defaults above.
/// Values set in configuration are kept.
pub fn fill_defaults(context: &mut EngineContext) {
    if context.instructions.trim().is_empty() {
        context.instructions = SYSTEM_PROMPT.to_string();
    }
    if context.context.is_null() {
        context.context = medicine_context();
    }
}
