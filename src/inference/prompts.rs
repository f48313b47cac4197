//! Instructions sent to the chat model.

/// System instruction for templates with explicit `[placeholders]`.
pub const EXTRACTION_INSTRUCTIONS: &str = "\
You are a clinical documentation assistant. You receive the raw transcription of a \
spoken consultation and must pull out the information needed to complete a note template.

Follow these rules:
1. Fix misheard words and use correct medical spelling and terminology.
2. Keep every value short and professional.
3. When the transcription says nothing about a field, use \"Not mentioned\".
4. Date fields default to today's date in YYYY-MM-DD form when no date is spoken.
5. Reply with ONE flat JSON object. Every value is a string; never nest objects or arrays.
6. When a field holds several items (for example findings), join them with commas.
7. Numbered fields such as Medicine 1, Medicine 2 receive the spoken items in order, one per field.
8. A field that asks for several measurements (for example BP, Pulse, Temp) gets a single \
combined string such as \"BP: 120/80, Pulse: 80\".
9. Use the template structure given below to match its format, tone and style.
10. Values already present in the template (for example \"Patient: John Doe\") are only \
examples. Replace them with what the transcription says, and keep them only when they are \
fixed wording.";

/// System instruction for filled templates without placeholders.
pub const INFERENCE_INSTRUCTIONS: &str = "\
You analyze documents. You receive a template that was already filled in for an earlier \
case, plus a new transcription.

Do the following:
1. Find the variable fields in the template together with their current values \
(\"Patient Name: Mr. Ali\" gives field \"Patient Name\" with original value \"Mr. Ali\").
2. Take the new value for each field from the transcription (for example \"Jane Doe\").
3. Answer with a JSON object keyed by field name. Each value is an object with:
   - \"original\": the exact text currently in the template that will be replaced;
   - \"new\": the value taken from the transcription.
4. When the transcription does not mention a field, set \"new\" to \"Not mentioned\".
5. Dates are the exception: a Date or Review Date that is not mentioned gets today's date \
(YYYY-MM-DD) instead of \"Not mentioned\".
6. The \"original\" text must be specific enough to replace safely. When a value is generic \
(for example \"No\"), include surrounding words or leave the field out.
7. Output valid JSON and nothing else.";

/// User message for explicit placeholder extraction.
pub fn extraction_request(transcript: &str, template_text: &str, placeholders: &[String]) -> String {
    let fields = placeholders
        .iter()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Raw Transcription:\n{transcript}\n\n\
         TEMPLATE STRUCTURE (Context):\n{template_text}\n\n\
         Extract data for these SPECIFIC fields (placeholders):\n{fields}\n\n\
         Return ONLY a valid, flat JSON object mapping field names to string values."
    )
}

/// User message for original/new value inference.
pub fn inference_request(transcript: &str, template_text: &str) -> String {
    format!(
        "Template Context (Filled):\n{template_text}\n\n\
         New Transcription:\n{transcript}\n\n\
         Return JSON mapping fields to original/new values."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_request_lists_fields() {
        let request = extraction_request("hello", "Name: [Name]", &["Date".into(), "Name".into()]);
        assert!(request.contains("Raw Transcription:\nhello"));
        assert!(request.contains("- Date\n- Name"));
    }

    #[test]
    fn test_inference_request_embeds_context() {
        let request = inference_request("new words", "Patient: Mr. Ali");
        assert!(request.starts_with("Template Context (Filled):\nPatient: Mr. Ali"));
        assert!(request.contains("New Transcription:\nnew words"));
    }
}
