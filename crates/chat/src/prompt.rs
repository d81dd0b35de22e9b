/// Fixed instruction sent as the system message of every row request.
pub const SYSTEM_PROMPT: &str = "You are a data generator. Always return valid JSON arrays matching the requested schema exactly. Never include explanatory text.";

/// User message: the table's prompt followed by the schema instruction.
pub fn generate_user_prompt(prompt: &str, schema_info: &str) -> String {
    format!("{prompt}\n\n{schema_info}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_keeps_prompt_first() {
        let p = generate_user_prompt("List planets", "IMPORTANT: ...");
        assert_eq!(p, "List planets\n\nIMPORTANT: ...");
    }
}
