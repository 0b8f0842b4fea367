use schemars::{JsonSchema, generate::SchemaSettings};
use serde_json::{Map, Value, json};

use crate::{
    batching::TokenBudget,
    error::DecodeError,
    records::{TranslatedItem, TranslationRequestItem},
    translators::{ModelReply, TranslationRequest},
};

pub const NR_FIELD: &str = "NR";
pub const BATCH_FIELD: &str = "d";
pub const PAYLOAD_HEADER: &str = "\n\nJSON Input:\n";

pub const DEFAULT_CONTEXT: &str =
    "You are a professional localizer for the medieval fantasy RPG series \"Gothic\".";
pub const DEFAULT_STYLE: &str = "Keep the tone rough, conversational and grounded in a medieval setting. Avoid modern slang or polite flowery language.";

/// Names the two text columns carry in the file and on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub source_header: String,
    pub target_header: String,
}

impl FieldMap {
    pub fn new(source_header: &str, target_header: &str) -> Self {
        Self {
            source_header: source_header.to_string(),
            target_header: target_header.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages {
    pub source: String,
    pub target: String,
}

/// Everything that goes into the instruction block of each request.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub languages: Languages,
    pub fields: FieldMap,
    pub context: String,
    pub style: String,
    /// Glossary text, inserted verbatim.
    pub dictionary: Option<String>,
}

impl PromptSettings {
    pub fn instructions(&self) -> String {
        let FieldMap {
            source_header,
            target_header,
        } = &self.fields;
        let Languages { source, target } = &self.languages;

        let mut text = format!(
            "{context}\n\
             Translate the text contained in the {source_header} field from {source} to {target} and write the result into the {target_header} field.\n\
             Style Guidelines: {style}\n\
             Output Format: Return a minified JSON array containing objects with strictly two fields: {NR_FIELD} and {target_header}. Exclude all other fields.\n\
             Output Format Example:\n\
             [{{\"{NR_FIELD}\":1,\"{target_header}\":\"Translation here\"}},{{\"{NR_FIELD}\":2,\"{target_header}\":\"Another translation\"}}]",
            context = self.context,
            style = self.style,
        );

        if let Some(dictionary) = &self.dictionary {
            text.push_str("\nUse the following dictionary for common terms:\n");
            text.push_str(dictionary);
        }

        text
    }
}

fn mapped_item(nr: i64, field: &str, text: &str) -> Value {
    let mut item = Map::new();
    item.insert(NR_FIELD.to_string(), Value::from(nr));
    item.insert(field.to_string(), Value::String(text.to_string()));
    Value::Object(item)
}

fn envelope(items: &[TranslationRequestItem], field: &str) -> String {
    let items: Vec<Value> = items
        .iter()
        .map(|item| mapped_item(item.nr, field, &item.original_text))
        .collect();
    json!({ BATCH_FIELD: items }).to_string()
}

/// `{"d":[{"NR":..,"<source header>":..}, ...]}`
pub fn encode_payload(items: &[TranslationRequestItem], fields: &FieldMap) -> String {
    envelope(items, &fields.source_header)
}

/// The reply these items would get if every translation kept the length of its
/// source: `{"d":[{"NR":..,"<target header>":<original>}, ...]}`.
pub fn encode_response_shape(items: &[TranslationRequestItem], fields: &FieldMap) -> String {
    envelope(items, &fields.target_header)
}

pub fn build_request(
    items: &[TranslationRequestItem],
    prompt: &PromptSettings,
    budget: &TokenBudget,
) -> TranslationRequest {
    TranslationRequest {
        instructions: prompt.instructions(),
        payload: encode_payload(items, &prompt.fields),
        schema: response_schema(&prompt.fields),
        output_tokens: budget.output_tokens,
        thinking_tokens: budget.thinking_tokens,
    }
}

const TEXT_PLACEHOLDER: &str = "text";

#[allow(dead_code)]
#[derive(JsonSchema, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ResponseEnvelope {
    d: Vec<ResponseItem>,
}

#[allow(dead_code)]
#[derive(JsonSchema, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ResponseItem {
    #[serde(rename = "NR")]
    nr: i64,
    text: String,
}

/// JSON schema for `{"d":[{"NR":int,"<target header>":string}]}`.
pub fn response_schema(fields: &FieldMap) -> Value {
    let generator = SchemaSettings::draft2020_12()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator();
    let mut schema = generator
        .into_root_schema_for::<ResponseEnvelope>()
        .to_value();

    if let Some(root) = schema.as_object_mut() {
        root.remove("$schema");
        root.remove("title");
    }
    if let Some(item) = schema.pointer_mut("/properties/d/items") {
        rename_property(item, TEXT_PLACEHOLDER, &fields.target_header);
    }

    schema
}

fn rename_property(schema: &mut Value, from: &str, to: &str) {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        if let Some(property) = properties.remove(from) {
            properties.insert(to.to_string(), property);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        for name in required.iter_mut() {
            if *name == from {
                *name = Value::String(to.to_string());
            }
        }
    }
}

/// Property lookup that tolerates a model changing the case of a key.
fn get_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).or_else(|| {
        object
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

/// Reads the reply as `{"d":[...]}`. A `null` document or `"d": null` is an empty
/// answer; anything else that does not fit is a [`DecodeError`].
pub fn decode_response(
    reply: &ModelReply,
    fields: &FieldMap,
) -> Result<Vec<TranslatedItem>, DecodeError> {
    let fail = |reason: String| DecodeError {
        reason,
        response_len: reply.text.chars().count(),
        finish_reason: reply.finish_reason.clone(),
    };

    let document: Value = serde_json::from_str(&reply.text).map_err(|e| fail(e.to_string()))?;

    let items = match &document {
        Value::Null => return Ok(Vec::new()),
        Value::Object(object) => match get_field(object, BATCH_FIELD) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => return Ok(Vec::new()),
            Some(_) => return Err(fail(format!("field `{BATCH_FIELD}` is not an array"))),
            None => return Err(fail(format!("missing field `{BATCH_FIELD}`"))),
        },
        _ => return Err(fail(format!("expected an object with field `{BATCH_FIELD}`"))),
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| decode_item(idx, item, &fields.target_header).map_err(fail))
        .collect()
}

fn decode_item(idx: usize, item: &Value, target_header: &str) -> Result<TranslatedItem, String> {
    let object = item
        .as_object()
        .ok_or_else(|| format!("{BATCH_FIELD}[{idx}] is not an object"))?;

    let nr = match get_field(object, NR_FIELD) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| format!("{BATCH_FIELD}[{idx}].{NR_FIELD} is not an integer"))?,
        ),
    };

    let translated_text = match get_field(object, target_header) {
        Some(Value::String(text)) => text.clone(),
        Some(_) => {
            return Err(format!(
                "{BATCH_FIELD}[{idx}].{target_header} is not a string"
            ));
        }
        None => return Err(format!("{BATCH_FIELD}[{idx}] has no field `{target_header}`")),
    };

    Ok(TranslatedItem {
        nr,
        translated_text,
    })
}

/// First `limit` characters of `text`, with `...` when cut.
pub fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldMap {
        FieldMap::new("DE", "EN")
    }

    fn prompt(dictionary: Option<&str>) -> PromptSettings {
        PromptSettings {
            languages: Languages {
                source: "German".into(),
                target: "English".into(),
            },
            fields: fields(),
            context: DEFAULT_CONTEXT.into(),
            style: DEFAULT_STYLE.into(),
            dictionary: dictionary.map(String::from),
        }
    }

    fn reply(text: &str) -> ModelReply {
        ModelReply {
            text: text.into(),
            finish_reason: Some("Length".into()),
            usage: None,
        }
    }

    #[test]
    fn payload_uses_source_header() {
        let items = [
            TranslationRequestItem {
                nr: 1,
                original_text: "Hallo".into(),
            },
            TranslationRequestItem {
                nr: 2,
                original_text: "Welt".into(),
            },
        ];

        assert_eq!(
            encode_payload(&items, &fields()),
            r#"{"d":[{"NR":1,"DE":"Hallo"},{"NR":2,"DE":"Welt"}]}"#
        );
        assert_eq!(
            encode_response_shape(&items, &fields()),
            r#"{"d":[{"NR":1,"EN":"Hallo"},{"NR":2,"EN":"Welt"}]}"#
        );
    }

    #[test]
    fn instructions_name_languages_and_headers() {
        let text = prompt(None).instructions();

        assert!(text.contains("from German to English"));
        assert!(text.contains("the DE field"));
        assert!(text.contains("into the EN field"));
        assert!(text.contains(r#"[{"NR":1,"EN":"Translation here"},"#));
        assert!(!text.contains("dictionary"));
    }

    #[test]
    fn dictionary_is_inserted_verbatim() {
        let text = prompt(Some("Buddler = digger\nGardist = guard")).instructions();

        assert!(text.ends_with(
            "Use the following dictionary for common terms:\nBuddler = digger\nGardist = guard"
        ));
    }

    #[test]
    fn schema_names_target_header() {
        let schema = response_schema(&fields());

        let item = schema.pointer("/properties/d/items").unwrap();
        assert_eq!(item.pointer("/properties/EN/type"), Some(&json!("string")));
        assert_eq!(item.pointer("/properties/NR/type"), Some(&json!("integer")));
        assert!(item.pointer("/properties/text").is_none());

        let required = item["required"].as_array().unwrap();
        assert!(required.contains(&json!("EN")));
        assert!(required.contains(&json!("NR")));
    }

    #[test]
    fn decodes_items_in_order() {
        let items = decode_response(
            &reply(r#"{"d":[{"NR":1,"EN":"Hello"},{"NR":2,"EN":"World"}]}"#),
            &fields(),
        )
        .unwrap();

        assert_eq!(
            items,
            vec![
                TranslatedItem {
                    nr: Some(1),
                    translated_text: "Hello".into()
                },
                TranslatedItem {
                    nr: Some(2),
                    translated_text: "World".into()
                },
            ]
        );
    }

    #[test]
    fn decode_matches_keys_case_insensitively() {
        let items = decode_response(&reply(r#"{"D":[{"nr":3,"en":"Hi"}]}"#), &fields()).unwrap();

        assert_eq!(items[0].nr, Some(3));
        assert_eq!(items[0].translated_text, "Hi");
    }

    #[test]
    fn null_nr_is_kept_as_absent() {
        let items = decode_response(&reply(r#"{"d":[{"NR":null,"EN":"x"}]}"#), &fields()).unwrap();
        assert_eq!(items[0].nr, None);
    }

    #[test]
    fn null_documents_are_empty() {
        assert!(decode_response(&reply("null"), &fields()).unwrap().is_empty());
        assert!(
            decode_response(&reply(r#"{"d":null}"#), &fields())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn truncated_reply_reports_length_and_finish_reason() {
        let text = r#"{"d":[{"NR":1,"EN":"Hel"#;
        let err = decode_response(&reply(text), &fields()).unwrap_err();

        assert_eq!(err.response_len, text.len());
        assert_eq!(err.finish_reason.as_deref(), Some("Length"));
        assert!(err.to_string().contains(&format!("Length: {}", text.len())));
    }

    #[test]
    fn schema_mismatches_are_errors() {
        for text in [
            r#"[{"NR":1,"EN":"Hello"}]"#,
            r#"{"items":[]}"#,
            r#"{"d":{"NR":1}}"#,
            r#"{"d":[{"NR":"one","EN":"Hello"}]}"#,
            r#"{"d":[{"NR":1,"EN":5}]}"#,
            r#"{"d":[{"NR":1}]}"#,
            r#"{"d":[1]}"#,
        ] {
            assert!(
                decode_response(&reply(text), &fields()).is_err(),
                "accepted {text}"
            );
        }
    }

    #[test]
    fn empty_reply_is_a_decode_error() {
        let err = decode_response(&reply(""), &fields()).unwrap_err();
        assert_eq!(err.response_len, 0);
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("Grüße", 3), "Grü...");
        assert_eq!(preview("kurz", 10), "kurz");
    }
}
