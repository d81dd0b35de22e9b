use crate::column::Column;
use serde_json::{Map, Value};

/// Instruction appended to the user prompt, describing the JSON shape every
/// generated row must have.
pub fn schema_instruction(columns: &[Column], max_rows: usize) -> String {
    let schema: Map<String, Value> = columns
        .iter()
        .map(|c| (c.name.clone(), Value::from(c.kind.json_hint())))
        .collect();
    // Map keeps insertion order (`preserve_order`), so columns stay in
    // declaration order.
    let schema = serde_json::to_string_pretty(&Value::Object(schema)).unwrap_or_default();

    let example_row = format!(
        "{{{}}}",
        columns
            .iter()
            .map(|c| format!("{}: <{}>", Value::from(c.name.as_str()), c.kind.json_hint()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    format!(
        r#"
IMPORTANT: Return ONLY a valid JSON array of objects. Each object must match this exact schema:

{schema}

Example format:
[
  {example_row},
  {example_row}
]

Return {max_rows} rows maximum. Do not include any text before or after the JSON array.
"#
    )
}
